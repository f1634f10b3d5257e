use std::process::{Command, Stdio};

use anyhow::Context;
use satchel_integrations::ids::{
    AUTH_ACTION_ADD_ACCOUNT, AUTH_ACTION_AUTHENTICATE, AUTH_ACTION_SETTINGS,
};

/// Why the authenticator is being launched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthAction {
    Authenticate,
    AddAccount,
    Settings,
}

impl AuthAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authenticate => AUTH_ACTION_AUTHENTICATE,
            Self::AddAccount => AUTH_ACTION_ADD_ACCOUNT,
            Self::Settings => AUTH_ACTION_SETTINGS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthRequest {
    pub action: AuthAction,
    pub account_id: Option<String>,
    pub account_display: Option<String>,
    pub initial_path: Option<String>,
}

impl AuthRequest {
    pub fn new(action: AuthAction) -> Self {
        Self {
            action,
            account_id: None,
            account_display: None,
            initial_path: None,
        }
    }
}

/// Terminal outcome of one authenticator round-trip, delivered on the
/// Auth1 callback interface. An authenticator that goes away without
/// sending one reports `Cancelled` itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated {
        account_id: Option<String>,
        account_display: Option<String>,
        initial_path: Option<String>,
    },
    AccountAdded {
        account_id: Option<String>,
        account_display: Option<String>,
        initial_path: Option<String>,
    },
    SettingsChanged {
        account_id: Option<String>,
        account_display: Option<String>,
        initial_path: Option<String>,
    },
    Cancelled,
}

/// Launches the out-of-process login UI. Fire-and-forget: outcomes come
/// back over the callback interface, never through this call.
pub trait Authenticator: Send + Sync + 'static {
    fn launch(&self, request: AuthRequest) -> anyhow::Result<()>;
}

/// Default authenticator: spawns a configured external program and hands
/// it the request as command-line arguments.
pub struct CommandAuthenticator {
    program: String,
}

impl CommandAuthenticator {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Authenticator for CommandAuthenticator {
    fn launch(&self, request: AuthRequest) -> anyhow::Result<()> {
        let args = request_args(&request);
        Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .with_context(|| format!("failed to launch authenticator {}", self.program))?;
        Ok(())
    }
}

fn request_args(request: &AuthRequest) -> Vec<String> {
    let mut args = vec!["--action".to_string(), request.action.as_str().to_string()];
    if let Some(account_id) = &request.account_id {
        args.push("--account".to_string());
        args.push(account_id.clone());
    }
    if let Some(display) = &request.account_display {
        args.push("--display".to_string());
        args.push(display.clone());
    }
    if let Some(path) = &request.initial_path {
        args.push("--initial-path".to_string());
        args.push(path.clone());
    }
    args
}
