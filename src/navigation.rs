//! Screen routing seam.
//!
//! The core only emits [`Route`] values; whatever presents them implements
//! [`Navigator`].

/// A destination screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    Login,
    Home,
    Reels,
    Search,
    Profile,
    Item { item_id: String },
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Route::Login => f.write_str("login"),
            Route::Home => f.write_str("home"),
            Route::Reels => f.write_str("reels"),
            Route::Search => f.write_str("search"),
            Route::Profile => f.write_str("profile"),
            Route::Item { item_id } => write!(f, "item/{item_id}"),
        }
    }
}

pub trait Navigator: Send {
    fn navigate(&mut self, route: Route);
}

/// Navigator for headless runs; records the route in the log.
#[derive(Debug, Default)]
pub struct LogNavigator {
    current: Option<Route>,
}

impl LogNavigator {
    pub fn current(&self) -> Option<&Route> {
        self.current.as_ref()
    }
}

impl Navigator for LogNavigator {
    fn navigate(&mut self, route: Route) {
        tracing::info!(%route, "Navigate");
        self.current = Some(route);
    }
}
