//! Runs one generation after the other, swapping them on reload requests.

use crate::{
    config::Config,
    generation::{DynNodeConnector, Generation},
};
use nodesvc_core::{debug, info, warn};
use nodesvc_notify::registry::ClientRegistry;
use nodesvc_utils::{
    reload::{ReloadListener, ReloadTrigger, reload_signal},
    triggers::Listener,
};
use parking_lot::Mutex;
use std::{fmt::Display, net::SocketAddr, sync::Arc};
use tokio::{
    select,
    sync::watch,
    time::{Instant, MissedTickBehavior, interval_at},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum State {
    Starting,
    Running,
    Draining,
    Stopped,
}

impl Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            State::Starting => "starting",
            State::Running => "running",
            State::Draining => "draining",
            State::Stopped => "stopped",
        };
        f.write_str(label)
    }
}

/// Lifecycle position of the service. Generation `0` means nothing was started yet.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServiceState {
    pub generation: u64,
    pub state: State,
}

impl ServiceState {
    pub fn new(generation: u64, state: State) -> Self {
        Self { generation, state }
    }
}

impl Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "generation {} {}", self.generation, self.state)
    }
}

enum Exit {
    Reload,
    Shutdown,
}

pub struct ReloadSupervisor {
    config: Arc<Config>,
    connector: DynNodeConnector,
    registry: Arc<ClientRegistry>,
    reload_trigger: ReloadTrigger,
    reload_listener: ReloadListener,
    state: watch::Sender<ServiceState>,
    serve_address: Mutex<Option<SocketAddr>>,
}

impl ReloadSupervisor {
    pub fn new(config: Arc<Config>, connector: DynNodeConnector) -> Self {
        let (reload_trigger, reload_listener) = reload_signal();
        let (state, _) = watch::channel(ServiceState::new(0, State::Stopped));
        Self {
            config,
            connector,
            registry: Arc::new(ClientRegistry::new()),
            reload_trigger,
            reload_listener,
            state,
            serve_address: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        self.registry.clone()
    }

    pub fn reload_trigger(&self) -> ReloadTrigger {
        self.reload_trigger.clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ServiceState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ServiceState {
        *self.state.borrow()
    }

    /// Address of the running generation
    pub fn serve_address(&self) -> Option<SocketAddr> {
        *self.serve_address.lock()
    }

    fn publish(&self, generation: u64, state: State) {
        let state = ServiceState::new(generation, state);
        debug!("Service {}", state);
        self.state.send_replace(state);
    }

    /// Runs generations until `shutdown` fires. The last generation is fully stopped on return.
    pub async fn run(&self, shutdown: Listener) {
        let mut number = 0;
        loop {
            number += 1;
            let Some(generation) = self.start_generation(number, &shutdown).await else {
                self.publish(number, State::Stopped);
                break;
            };

            // Requests that arrived while the previous generation was going down are stale
            let discarded = self.reload_listener.discard_pending();
            if discarded > 0 {
                debug!("Ignoring {} reload request(s) received while not running", discarded);
            }
            *self.serve_address.lock() = Some(generation.serve_address());
            self.publish(generation.number(), State::Running);

            let exit = select! {
                biased;
                _ = shutdown.clone() => Exit::Shutdown,
                requested = self.reload_listener.recv() => if requested { Exit::Reload } else { Exit::Shutdown },
            };

            self.publish(generation.number(), State::Draining);
            *self.serve_address.lock() = None;
            generation.drain().await;
            self.publish(number, State::Stopped);

            match exit {
                Exit::Shutdown => break,
                Exit::Reload => {
                    if self.config.reset_registry_on_reload {
                        info!("Reload: resetting {}", self.registry);
                        self.registry.clear();
                    } else {
                        info!("Reload: keeping {}", self.registry);
                    }
                }
            }
        }
        info!("Service supervisor exited");
    }

    /// Starts generation `number`, retrying every `reload_retry_interval`.
    /// Returns `None` if `shutdown` fires first.
    async fn start_generation(&self, number: u64, shutdown: &Listener) -> Option<Generation> {
        self.publish(number, State::Starting);
        let period = self.config.reload_retry_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            match Generation::start(number, &self.config, self.registry.clone(), self.connector.as_ref(), self.reload_trigger.clone()).await {
                Ok(generation) => return Some(generation),
                Err(err) => warn!("Starting generation {} failed, retrying in {:?}: {}", number, period, err),
            }
            select! {
                biased;
                _ = shutdown.clone() => return None,
                _ = ticker.tick() => {}
            }
        }
    }
}
