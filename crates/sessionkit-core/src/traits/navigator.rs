//! Navigation and host-environment capabilities.

/// The page the user is currently on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// `scheme://host[:port]` of the current page.
    pub origin: String,
    /// Path including query string and fragment, e.g. `/plans?tab=annual`.
    pub path: String,
}

impl Location {
    pub fn new(origin: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            path: path.into(),
        }
    }
}

/// Page navigation.
pub trait Navigator: Send + Sync {
    /// Returns the current location.
    fn location(&self) -> Location;

    /// Navigates to a relative path on the current origin.
    fn navigate(&self, path: &str);
}

/// An embedding host (such as a messenger mini-app container) that may hand
/// the client signed initialization data to forward with every request.
pub trait HostEnvironment: Send + Sync {
    fn init_data(&self) -> Option<String>;
}
