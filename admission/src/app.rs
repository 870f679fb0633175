//! Service assembly.
//!
//! Builds the store, gateway and services from [`Config`] and wires them
//! into the router and the sweeper.

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, StoreBackend};
use crate::gateway::{MockPaymentGateway, PaymentGateway, SnapGateway};
use crate::lifecycle::TicketLifecycle;
use crate::purchase::PurchaseService;
use crate::reconciler::Reconciler;
use crate::server::{AppState, CheckoutConfig, build_router};
use crate::store::{AdmissionStore, InMemoryStore, PostgresStore};
use crate::sweeper::ExpirySweeper;
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};

/// Every service the process runs, sharing one store and one clock.
#[derive(Clone)]
pub struct Services {
    /// Shared store
    pub store: Arc<dyn AdmissionStore>,
    /// Purchase orchestrator
    pub purchases: Arc<PurchaseService>,
    /// Ticket lifecycle
    pub tickets: Arc<TicketLifecycle>,
    /// Notification reconciler
    pub reconciler: Arc<Reconciler>,
    /// Expiry sweeper, not yet running
    pub sweeper: ExpirySweeper,
    /// Public checkout settings served to clients
    pub checkout: Arc<CheckoutConfig>,
}

impl Services {
    /// Wire services over explicit collaborators.
    #[must_use]
    pub fn new(
        config: &Config,
        store: Arc<dyn AdmissionStore>,
        gateway: Arc<dyn PaymentGateway>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let purchases = Arc::new(PurchaseService::new(
            Arc::clone(&store),
            gateway,
            Arc::clone(&clock),
        ));
        let tickets = Arc::new(TicketLifecycle::new(Arc::clone(&store), Arc::clone(&clock)));
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&store),
            Arc::clone(&clock),
            config.gateway.server_key.clone(),
        ));
        let sweeper = ExpirySweeper::new(
            Arc::clone(&store),
            clock,
            chrono::Duration::seconds(i64::try_from(config.sweeper.pending_ttl).unwrap_or(i64::MAX)),
            std::time::Duration::from_secs(config.sweeper.interval.max(1)),
        );
        let checkout = Arc::new(CheckoutConfig {
            client_key: config.gateway.client_key.clone(),
            is_sandbox: !config.gateway.production,
        });
        Self {
            store,
            purchases,
            tickets,
            reconciler,
            sweeper,
            checkout,
        }
    }

    /// Build the store and gateway named by `config`, then wire services.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable, migrations fail, or
    /// the gateway client cannot be built.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn AdmissionStore> = match config.server.store_backend {
            StoreBackend::Postgres => {
                let store = PostgresStore::connect(&config.postgres)
                    .await
                    .context("connecting to PostgreSQL")?;
                if config.postgres.run_migrations {
                    store.migrate().await.context("running migrations")?;
                }
                info!("Using PostgreSQL store");
                Arc::new(store)
            }
            StoreBackend::Memory => {
                warn!("Using in-memory store; state is lost on restart");
                Arc::new(InMemoryStore::new())
            }
        };

        let gateway: Arc<dyn PaymentGateway> = if config.gateway.mock {
            warn!("Using mock payment gateway");
            MockPaymentGateway::shared()
        } else {
            if config.gateway.server_key.is_empty() {
                warn!("GATEWAY_SERVER_KEY is empty; every notification will be rejected");
            }
            Arc::new(SnapGateway::from_config(&config.gateway).context("building gateway client")?)
        };

        Ok(Self::new(config, store, gateway, Arc::new(SystemClock)))
    }

    /// HTTP state over these services.
    #[must_use]
    pub fn state(&self) -> AppState {
        AppState::new(
            Arc::clone(&self.purchases),
            Arc::clone(&self.tickets),
            Arc::clone(&self.reconciler),
            Arc::clone(&self.store),
            Arc::clone(&self.checkout),
        )
    }

    /// Router over these services.
    pub fn router(&self) -> axum::Router {
        build_router(self.state())
    }
}

impl std::fmt::Debug for Services {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Services")
            .field("sweeper", &self.sweeper)
            .finish_non_exhaustive()
    }
}
