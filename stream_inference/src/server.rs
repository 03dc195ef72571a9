use crate::{
    config::{Config, Validatable},
    inference_service::InferenceService,
    model_service::ModelService,
    ort_service::OrtModelService,
    registry::SessionRegistry,
    state::LabelMapping,
};
use std::sync::Arc;
use std::time::Duration;
use stream_proto::stream_classifier_server::StreamClassifierServer;
use tokio::signal;
use tonic::transport::server::Router;
use tonic::transport::Server;

pub struct GrpcServer {
    router: Router,
    addr: String,
}

impl GrpcServer {
    pub fn new<M: ModelService>(
        inference_service: InferenceService<M>,
        addr: &str,
        max_message_bytes: usize,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let reflection_service = tonic_reflection::server::Builder::configure()
            .register_encoded_file_descriptor_set(stream_proto::FILE_DESCRIPTOR_SET)
            .build_v1alpha()?;

        let (mut health_reporter, health_service) = tonic_health::server::health_reporter();
        tokio::spawn(async move {
            health_reporter
                .set_serving::<StreamClassifierServer<InferenceService<M>>>()
                .await;
        });

        let classifier_service = StreamClassifierServer::new(inference_service)
            .max_decoding_message_size(max_message_bytes)
            .max_encoding_message_size(max_message_bytes);

        let router = Server::builder()
            .add_service(classifier_service)
            .add_service(reflection_service)
            .add_service(health_service);

        Ok(Self {
            router,
            addr: addr.to_string(),
        })
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = self.addr.parse()?;

        tracing::info!("Inference service listening on {}", self.addr);

        let shutdown = async {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received, starting graceful shutdown")
        };

        self.router.serve_with_shutdown(addr, shutdown).await?;
        Ok(())
    }
}

pub async fn start_server(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    config.smoothing.validate()?;
    config.session.validate()?;
    config.labels.validate()?;
    config.model.validate()?;

    let labels = Arc::new(LabelMapping::load(&config.labels.get_path())?);
    tracing::info!(
        num_classes = labels.num_classes(),
        "label mapping loaded"
    );

    let model_service = OrtModelService::new(&config.model, labels.num_classes())?;

    let registry = Arc::new(SessionRegistry::new(
        config.smoothing.window_size,
        config.session.max_clients,
    ));
    if let Some(secs) = config.session.idle_timeout_secs {
        spawn_idle_reaper(Arc::clone(&registry), Duration::from_secs(secs));
    }

    let inference_service = InferenceService::new(model_service, labels, registry);

    let addr = config.server.get_address();
    let grpc_server = GrpcServer::new(
        inference_service,
        &addr,
        config.server.max_message_bytes,
    )?;

    grpc_server.run().await
}

fn spawn_idle_reaper(registry: Arc<SessionRegistry>, ttl: Duration) {
    let period = Duration::from_secs((ttl.as_secs() / 2).max(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            let evicted = registry.evict_idle(ttl);
            if evicted > 0 {
                tracing::info!(evicted, remaining = registry.len(), "reaped idle client sessions");
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
