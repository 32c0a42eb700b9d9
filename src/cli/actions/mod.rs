pub mod server;

/// What the process was asked to do.
#[derive(Debug)]
pub enum Action {
    Server(server::Args),
}

impl Action {
    /// # Errors
    /// Returns an error if a backend cannot be reached or a listener fails.
    pub async fn execute(self) -> anyhow::Result<()> {
        match self {
            Self::Server(args) => server::execute(args).await,
        }
    }
}
