pub const APP_ID_BASE: &str = "io.satchel";

pub const DBUS_NAME_PLUGIN: &str = "io.satchel.Plugin1";
pub const DBUS_INTERFACE_PLUGIN: &str = "io.satchel.Plugin1";
pub const DBUS_OBJECT_PATH_PLUGIN: &str = "/io/satchel/Plugin1";

pub const DBUS_INTERFACE_AUTH: &str = "io.satchel.Auth1";
pub const DBUS_OBJECT_PATH_AUTH: &str = "/io/satchel/Auth1";

pub const DBUS_ERROR_NOT_CONNECTED: &str = "io.satchel.Plugin1.Error.NotConnected";
pub const DBUS_ERROR_ALREADY_CONNECTED: &str = "io.satchel.Plugin1.Error.AlreadyConnected";
pub const DBUS_ERROR_BACKEND: &str = "io.satchel.Plugin1.Error.Backend";

pub const AUTH_ACTION_AUTHENTICATE: &str = "authenticate";
pub const AUTH_ACTION_ADD_ACCOUNT: &str = "add-account";
pub const AUTH_ACTION_SETTINGS: &str = "settings";
