//! Main application state and service coordination
//!
//! `AppState` owns every long-lived component: the sorted queue store, the
//! matchmaker and its dispatch worker, the AMQP consumer and publisher, the
//! health server, and the background maintenance tasks.

use crate::amqp::connection::{AmqpConfig, AmqpConnection};
use crate::amqp::handlers::{MatchRequestConsumer, MatchmakerMessageHandler};
use crate::amqp::publisher::{
    AmqpEventPublisher, EventPublisher, LoggingEventPublisher, PublisherConfig,
};
use crate::config::{AppConfig, StoreBackend};
use crate::engine::{DispatchWorker, MatchDispatcher, Matchmaker};
use crate::metrics::{HealthServer, HealthServerConfig, MetricsCollector};
use crate::queue::{InMemorySortedQueue, RedisSortedQueue, SortedQueue, StoreOptions};
use crate::service::health::{HealthCheck, HealthContext};
use crate::session::SessionHandler;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tracing::{debug, error, info, warn};

/// How often health gauges and uptime are refreshed
const HEALTH_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Service-level errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("AMQP connection error: {message}")]
    AmqpConnection { message: String },

    #[error("Store error: {message}")]
    Store { message: String },

    #[error("Service initialization error: {message}")]
    Initialization { message: String },

    #[error("Background task error: {message}")]
    BackgroundTask { message: String },
}

/// Main application state containing all service components
pub struct AppState {
    config: AppConfig,

    metrics_collector: Arc<MetricsCollector>,
    matchmaker: Matchmaker,
    dispatch_worker: Option<DispatchWorker>,

    /// Present when AMQP is enabled
    amqp_connection: Option<AmqpConnection>,
    request_consumer: Option<MatchRequestConsumer>,

    health_context: HealthContext,
    health_server: Arc<HealthServer>,

    background_tasks: Vec<JoinHandle<()>>,
}

impl AppState {
    /// Initialize the application with all dependencies
    pub async fn new(config: AppConfig) -> Result<Self, ServiceError> {
        info!("Initializing {} matchmaking service", config.service.name);
        info!(
            "Configuration: store={}, amqp_enabled={}, group_size={}",
            config.store.backend, config.amqp.enabled, config.matchmaking.group_size
        );

        let metrics_collector =
            Arc::new(
                MetricsCollector::new().map_err(|e| ServiceError::Initialization {
                    message: format!("Failed to create metrics collector: {}", e),
                })?,
            );

        let store = Self::initialize_store(&config).await?;

        let amqp_connection = if config.amqp.enabled {
            Some(Self::initialize_amqp(&config).await?)
        } else {
            info!("AMQP disabled - session requests will only be logged");
            None
        };

        let publisher = Self::initialize_publisher(&config, amqp_connection.as_ref()).await?;

        let handler = Arc::new(SessionHandler::new(publisher));
        let (dispatcher, dispatch_worker) =
            MatchDispatcher::start(handler, metrics_collector.clone());

        let matchmaker = Matchmaker::new(
            store,
            config.matchmaking.clone(),
            dispatcher,
            metrics_collector.clone(),
        );

        let health_context = HealthContext::new(config.service.name.clone(), matchmaker.clone());
        let health_config = HealthServerConfig {
            port: config.service.health_port,
            host: "0.0.0.0".to_string(),
        };
        let health_server = Arc::new(
            HealthServer::new(health_config, metrics_collector.clone())
                .with_context(health_context.clone()),
        );

        Ok(Self {
            config,
            metrics_collector,
            matchmaker,
            dispatch_worker: Some(dispatch_worker),
            amqp_connection,
            request_consumer: None,
            health_context,
            health_server,
            background_tasks: Vec::new(),
        })
    }

    /// Start the health server, request consumption, and background tasks
    pub async fn start(&mut self) -> Result<(), ServiceError> {
        info!("Starting {} matchmaking service", self.config.service.name);

        self.health_context.set_running(true);

        self.start_health_server();

        if self.amqp_connection.is_some() {
            self.start_amqp_consumption().await?;
        }

        self.start_background_tasks();

        info!("✅ {} matchmaking service started", self.config.service.name);
        Ok(())
    }

    /// Perform graceful shutdown
    ///
    /// Consumption stops first so no new submissions arrive. Match attempts
    /// already spawned are allowed to finish, then groups handed to the
    /// dispatcher are delivered within the shutdown timeout.
    pub async fn shutdown(&mut self) -> Result<(), ServiceError> {
        info!("Starting graceful shutdown of {}", self.config.service.name);

        self.health_context.set_running(false);

        if let Some(consumer) = self.request_consumer.take() {
            if let Err(e) = consumer.stop_consuming().await {
                warn!("Failed to stop AMQP consumer: {}", e);
            } else {
                info!("✅ AMQP message consumption stopped");
            }
        }

        if let Err(e) = self.health_server.stop().await {
            warn!("Failed to stop health server: {}", e);
        }

        self.stop_background_tasks().await;

        let in_flight = self.matchmaker.attempts_in_flight();
        if in_flight > 0 {
            debug!("Waiting for {} match attempts to finish", in_flight);
        }
        if !self
            .matchmaker
            .wait_for_attempts(self.config.shutdown_timeout())
            .await
        {
            warn!(
                "{} match attempts still running at shutdown",
                self.matchmaker.attempts_in_flight()
            );
        }

        if let Some(worker) = self.dispatch_worker.take() {
            worker.shutdown(self.config.shutdown_timeout()).await;
        }

        if let Some(connection) = self.amqp_connection.take() {
            if let Err(e) = connection.close().await {
                warn!("Failed to close AMQP connection: {}", e);
            } else {
                info!("✅ AMQP connection closed");
            }
        }

        let final_stats = self.metrics_collector.snapshot();
        info!("Final matchmaking statistics: {:?}", final_stats);
        info!("✅ {} shutdown completed", self.config.service.name);

        Ok(())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.health_context.is_running()
    }

    pub fn matchmaker(&self) -> &Matchmaker {
        &self.matchmaker
    }

    pub fn metrics_collector(&self) -> Arc<MetricsCollector> {
        self.metrics_collector.clone()
    }

    /// State shared with the health probes
    pub fn health_context(&self) -> HealthContext {
        self.health_context.clone()
    }

    async fn initialize_store(config: &AppConfig) -> Result<Arc<dyn SortedQueue>, ServiceError> {
        let options = StoreOptions::from_config(config);

        match config.store.backend {
            StoreBackend::Memory => {
                info!("Using in-memory sorted queue store");
                Ok(Arc::new(InMemorySortedQueue::new(options)))
            }
            StoreBackend::Redis => {
                info!("Connecting to Redis store: {}", config.store.redis_url);
                let store = RedisSortedQueue::connect(&config.store.redis_url, options)
                    .await
                    .map_err(|e| ServiceError::Store {
                        message: format!("Failed to connect to Redis: {}", e),
                    })?;
                Ok(Arc::new(store))
            }
        }
    }

    /// Initialize AMQP connection with retry logic
    async fn initialize_amqp(config: &AppConfig) -> Result<AmqpConnection, ServiceError> {
        info!("Connecting to AMQP broker: {}", config.amqp.url);

        let amqp_config =
            AmqpConfig::from_app_config(config).map_err(|e| ServiceError::Configuration {
                message: format!("Failed to parse AMQP URL: {}", e),
            })?;

        AmqpConnection::new(amqp_config)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to connect to AMQP: {}", e),
            })
    }

    async fn initialize_publisher(
        config: &AppConfig,
        connection: Option<&AmqpConnection>,
    ) -> Result<Arc<dyn EventPublisher>, ServiceError> {
        let Some(connection) = connection else {
            return Ok(Arc::new(LoggingEventPublisher));
        };

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to open publisher channel: {}", e),
            })?;

        let publisher = AmqpEventPublisher::new(channel, PublisherConfig::from_app_config(config))
            .await
            .map_err(|e| ServiceError::Initialization {
                message: format!("Failed to initialize event publisher: {}", e),
            })?;

        Ok(Arc::new(publisher))
    }

    fn start_health_server(&mut self) {
        let health_server = self.health_server.clone();
        let port = self.config.service.health_port;

        let handle = tokio::spawn(async move {
            if let Err(e) = health_server.start().await {
                error!("Health server failed: {}", e);
            }
        });
        self.background_tasks.push(handle);

        info!("Health and metrics endpoints starting on port {}", port);
    }

    async fn start_amqp_consumption(&mut self) -> Result<(), ServiceError> {
        let Some(connection) = &self.amqp_connection else {
            return Ok(());
        };
        let queue = self.config.amqp.request_queue.clone();

        let channel = connection
            .open_channel()
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to open consumer channel: {}", e),
            })?;

        let handler = Arc::new(MatchmakerMessageHandler::new(self.matchmaker.clone()));
        let consumer = MatchRequestConsumer::new(handler, channel);

        consumer
            .declare_queue(&queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: e.to_string(),
            })?;
        consumer
            .start_consuming(&queue)
            .await
            .map_err(|e| ServiceError::AmqpConnection {
                message: format!("Failed to start consuming messages: {}", e),
            })?;

        self.request_consumer = Some(consumer);
        info!("Listening for match requests on queue '{}'", queue);
        Ok(())
    }

    fn start_background_tasks(&mut self) {
        let purge_task = {
            let store = self.matchmaker.queue();
            let metrics_collector = self.metrics_collector.clone();
            let context = self.health_context.clone();
            let purge_interval = self.config.purge_interval();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(purge_interval);
                debug!("Bucket purge task started ({:?} interval)", purge_interval);

                while context.is_running() {
                    interval.tick().await;

                    match store.purge_expired().await {
                        Ok(0) => debug!("Purge completed - no expired buckets"),
                        Ok(purged) => {
                            info!("Purged {} expired buckets", purged);
                            metrics_collector.record_buckets_purged(purged);
                        }
                        Err(e) => warn!("Bucket purge failed: {}", e),
                    }
                }

                debug!("Bucket purge task stopped");
            })
        };

        let health_task = {
            let context = self.health_context.clone();

            tokio::spawn(async move {
                let mut interval = tokio::time::interval(HEALTH_REFRESH_INTERVAL);

                while context.is_running() {
                    interval.tick().await;

                    match HealthCheck::check(&context).await {
                        Ok(health) => debug!(
                            "Health check: {} - {} groups formed, {} players matched",
                            health.status,
                            health.stats.matchmaking.groups_formed,
                            health.stats.matchmaking.players_matched
                        ),
                        Err(e) => warn!("Health check failed: {}", e),
                    }
                }
            })
        };

        self.background_tasks.push(purge_task);
        self.background_tasks.push(health_task);
        info!("Background maintenance tasks started");
    }

    async fn stop_background_tasks(&mut self) {
        let task_count = self.background_tasks.len();
        if task_count == 0 {
            return;
        }

        // Interval loops may be parked on a tick
        for task in self.background_tasks.drain(..) {
            task.abort();
            if let Err(e) = task.await {
                if !e.is_cancelled() {
                    warn!("Background task ended abnormally: {}", e);
                }
            }
        }

        info!("✅ {} background tasks stopped", task_count);
    }
}
