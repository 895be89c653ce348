//! Process wiring: builds every collaborator once from configuration.

use std::sync::Arc;

use tracing::info;

use crate::agents::AgentCatalog;
use crate::config::{PipelineConfig, ServerConfig};
use crate::error::Result;
use crate::gateway::HttpGatewayClient;
use crate::llm::create_service;
use crate::pipeline::processor::{MessageProcessor, PipelineDeps};
use crate::store::{LibSqlBackend, MemoryStore};

/// Open the database, load the agent catalog and build the processor.
pub async fn build_processor(server: &ServerConfig, pipeline: &PipelineConfig) -> Result<MessageProcessor> {
    let catalog = AgentCatalog::load(&server.agents_path).await?;
    let agents = Arc::new(MemoryStore::from_catalog(catalog));

    let db = Arc::new(LibSqlBackend::new_local(&server.db_path).await?);

    let gateway = Arc::new(HttpGatewayClient::new(
        server.gateway_base_url.clone(),
        server.gateway_api_key.clone(),
        pipeline.send_timeout,
    )?);

    info!(
        db_path = %server.db_path.display(),
        agents_path = %server.agents_path.display(),
        "Pipeline collaborators ready"
    );

    Ok(MessageProcessor::new(
        PipelineDeps {
            tickets: db.clone(),
            agents,
            executions: db.clone(),
            history: db,
            model: create_service(&server.llm),
            gateway,
        },
        pipeline,
    ))
}
