//! The engine controller.
//!
//! Deserialized from the configuration file, then [`Mailflow::run`]
//! seeds the store, starts the queue worker and the daily retention
//! sweep, and waits for a shutdown signal.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Deserialize;

use mailflow_common::config::EngineConfig;
use mailflow_common::logging;
use mailflow_common::model::{EmailTemplate, EmailTemplateLayout, SmtpServer};
use mailflow_delivery::{Dispatcher, EmlArchiver, QueueManager};
use mailflow_smtp::{SmtpTimeouts, SmtpTransport, Transport};
use mailflow_store::{FsObjectStore, MemoryStore, ObjectStore};

/// Interval between retention sweeps.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// The whole engine, as described by the configuration file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Mailflow {
    #[serde(default)]
    pub engine: EngineConfig,

    /// SMTP exchange deadlines.
    #[serde(default)]
    pub timeouts: SmtpTimeouts,

    /// Root directory for the object store (EML artifacts, attachment
    /// sources).
    #[serde(default = "default_storage_root")]
    pub storage_root: PathBuf,

    /// The domain announced in EHLO.
    #[serde(default)]
    pub helo_domain: Option<String>,

    #[serde(alias = "server", default)]
    pub servers: Vec<SmtpServer>,

    #[serde(alias = "layout", default)]
    pub layouts: Vec<EmailTemplateLayout>,

    #[serde(alias = "template", default)]
    pub templates: Vec<EmailTemplate>,
}

fn default_storage_root() -> PathBuf {
    PathBuf::from("./storage")
}

/// The assembled runtime components.
#[derive(Debug)]
pub struct Engine {
    pub store: Arc<MemoryStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub queue: Arc<QueueManager>,
}

impl Mailflow {
    /// Seed the store and assemble the dispatch components.
    ///
    /// # Errors
    ///
    /// Fails when a configured layout or template is rejected by the
    /// store (missing content token, duplicate slug).
    pub fn build(self) -> anyhow::Result<Engine> {
        let store = Arc::new(MemoryStore::new());

        for server in self.servers {
            let record = store.add_server(server);
            tracing::info!(id = record.id, name = %record.name, "server configured");
        }
        for layout in self.layouts {
            let record = store.add_layout(layout)?;
            tracing::info!(id = record.id, name = %record.name, "layout configured");
        }
        for template in self.templates {
            let record = store.add_template(template)?;
            tracing::info!(id = record.id, slug = %record.slug, "template configured");
        }

        let objects: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(self.storage_root));
        let archiver = EmlArchiver::new(objects, self.engine.eml.clone());

        let mut transport = SmtpTransport::new(self.timeouts);
        if let Some(domain) = self.helo_domain {
            transport = transport.helo_domain(domain);
        }
        let transport: Arc<dyn Transport> = Arc::new(transport);

        let dispatcher = Arc::new(Dispatcher::new(
            store.clone(),
            transport,
            archiver,
            &self.engine,
        ));
        let queue = Arc::new(QueueManager::new(
            dispatcher.clone(),
            self.engine.queue.clone(),
        ));

        Ok(Engine {
            store,
            dispatcher,
            queue,
        })
    }

    /// Run the engine until a shutdown signal arrives.
    pub async fn run(self) -> anyhow::Result<()> {
        logging::init();

        let engine = self.build()?;
        tracing::info!(
            servers = engine.store.servers().len(),
            templates = engine.store.templates().len(),
            "engine running"
        );

        let queue = engine.queue.clone();
        let dispatcher = engine.dispatcher.clone();

        tokio::select! {
            () = queue.run() => {}
            () = retention_sweep(dispatcher) => {}
            result = shutdown() => {
                result?;
            }
        }

        tracing::info!("shutting down");

        Ok(())
    }
}

/// Sweep expired EML artifacts once an hour.
async fn retention_sweep(dispatcher: Arc<Dispatcher>) {
    loop {
        tokio::time::sleep(SWEEP_INTERVAL).await;

        match dispatcher
            .archiver()
            .cleanup(dispatcher.store(), Utc::now())
            .await
        {
            Ok(0) => {}
            Ok(swept) => tracing::info!(swept, "retention sweep complete"),
            Err(err) => tracing::warn!(%err, "retention sweep failed"),
        }
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown() -> anyhow::Result<()> {
    let mut terminate = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("interrupt received");
        }
        _ = terminate.recv() => {
            tracing::info!("terminate received");
        }
    }

    Ok(())
}
