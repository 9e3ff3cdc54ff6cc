use std::sync::Arc;

use crate::client::ClusterClient;
use crate::config::OperatorConfig;

/// State shared by every reconcile pass.
#[derive(Clone)]
pub struct Ctx {
    pub client: Arc<dyn ClusterClient>,
    pub config: OperatorConfig,
}

impl Ctx {
    pub fn new(client: Arc<dyn ClusterClient>, config: OperatorConfig) -> Self {
        Self { client, config }
    }
}
