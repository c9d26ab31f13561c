use crate::router::RouterService;

/// A routing table together with the name hosts log it under.
pub struct App {
    name: &'static str,
    router: RouterService,
}

impl App {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn router(&self) -> &RouterService {
        &self.router
    }

    pub fn into_router(self) -> RouterService {
        self.router
    }
}

/// Lets a host build an application without knowing its routes.
pub trait Hooks {
    fn name() -> &'static str;

    fn routes() -> RouterService;

    fn build_app() -> App {
        App {
            name: Self::name(),
            router: Self::routes(),
        }
    }
}
