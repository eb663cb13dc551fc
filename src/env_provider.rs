//! Source of CGI environment variables.
//!
//! Parsing code never calls `std::env::vars()` directly so that the
//! environment ingester (see [`crate::env`]) can be exercised in tests
//! without touching real process state.

/// A source of `KEY=VALUE` environment entries, in presentation order.
pub trait EnvProvider {
    fn vars(&self) -> Vec<(String, String)>;
}

/// The real process environment.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvProvider for ProcessEnv {
    fn vars(&self) -> Vec<(String, String)> {
        std::env::vars().collect()
    }
}

/// A fixed set of entries, for tests.
#[derive(Debug, Default, Clone)]
pub struct MapEnv(Vec<(String, String)>);

impl MapEnv {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self(entries)
    }
}

impl EnvProvider for MapEnv {
    fn vars(&self) -> Vec<(String, String)> {
        self.0.clone()
    }
}
