//! Scenario builder API.
//!
//! Provides a declarative API for constructing scenario tests that enforce
//! the Oracle Pattern: a scenario cannot be run until it has an oracle.

use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tellerframe_core::{Card, Endpoint, Runtime, RuntimeConfig, RuntimeError, Vault};
use tellerframe_proto::{Role, literals};
use tokio::io::{ReadHalf, WriteHalf};
use tracing::debug;
use turmoil::net::TcpStream;

use crate::{
    atm::Atm,
    controller::Controller,
    model::{ModelWorld, Operation},
    scenario::{OracleFn, Step, World},
    sim_store::SharedStore,
    sim_transport::SimTransport,
};

/// Name of the controller host.
pub const ATM_HOST: &str = "atm";

/// Longest generated garbage frame.
const MAX_GARBAGE_LEN: usize = 64;

/// Connection attempts before the controller gives up on a host.
const CONNECT_ATTEMPTS: usize = 50;

type SimController = Controller<ReadHalf<TcpStream>, WriteHalf<TcpStream>>;

/// Scenario builder.
///
/// Add endpoint hosts and controller operations, then call `.oracle()` to get
/// a [`RunnableScenario`].
pub struct Scenario {
    name: String,
    endpoints: Vec<(String, Role)>,
    operations: Vec<Operation>,
    garbage_frames: usize,
    seed: u64,
    latency: Option<Duration>,
}

impl Scenario {
    /// Create a new scenario with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            endpoints: Vec::new(),
            operations: Vec::new(),
            garbage_frames: 0,
            seed: 0,
            latency: None,
        }
    }

    /// Add a card endpoint host.
    pub fn card(mut self, name: impl Into<String>) -> Self {
        self.endpoints.push((name.into(), Role::Card));
        self
    }

    /// Add a vault endpoint host.
    pub fn vault(mut self, name: impl Into<String>) -> Self {
        self.endpoints.push((name.into(), Role::SecurityModule));
        self
    }

    /// Seed for the simulation and for generated garbage.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Fixed one-way latency on every link.
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Send this many random non-`READY` frames to each endpoint before the
    /// first operation.
    pub fn garbage_frames(mut self, count: usize) -> Self {
        self.garbage_frames = count;
        self
    }

    /// Append one controller operation.
    pub fn operation(mut self, op: Operation) -> Self {
        self.operations.push(op);
        self
    }

    /// Append controller operations.
    pub fn operations(mut self, ops: impl IntoIterator<Item = Operation>) -> Self {
        self.operations.extend(ops);
        self
    }

    /// Set the oracle function and return a runnable scenario.
    pub fn oracle(self, oracle: OracleFn) -> RunnableScenario {
        RunnableScenario { scenario: self, oracle }
    }
}

/// A scenario with an oracle function that can be executed.
pub struct RunnableScenario {
    scenario: Scenario,
    oracle: OracleFn,
}

impl RunnableScenario {
    /// Execute the scenario.
    ///
    /// Every endpoint runs the real [`Runtime`] on its own turmoil host over
    /// a [`SharedStore`]. The controller host connects to each, echoes the
    /// garbage prefix, then performs the operations in order while the
    /// reference model predicts each observation. The oracle runs on the
    /// resulting [`World`].
    pub fn run(self) -> Result<(), String> {
        let Scenario { name, endpoints, operations, garbage_frames, seed, latency } = self.scenario;

        let card_host = single_host(&name, &endpoints, Role::Card)?;
        let vault_host = single_host(&name, &endpoints, Role::SecurityModule)?;
        for op in &operations {
            let host = if op.targets_card() { &card_host } else { &vault_host };
            if host.is_none() {
                return Err(format!("Scenario '{name}': {op:?} has no endpoint to talk to"));
            }
        }

        let world = Arc::new(Mutex::new(World::new()));

        let mut builder = turmoil::Builder::new();
        builder.simulation_duration(Duration::from_secs(600)).rng_seed(seed);
        if let Some(latency) = latency {
            builder.min_message_latency(latency).max_message_latency(latency);
        }
        let mut sim = builder.build();

        for (host, role) in endpoints {
            let store = SharedStore::new();
            lock(&world).add_endpoint(host.clone(), role, store.clone());
            sim.host(host, move || serve_endpoint(role, store.clone()));
        }

        let plan = Plan { card_host, vault_host, operations, garbage_frames, seed };
        sim.client(ATM_HOST, drive(plan, Arc::clone(&world)));

        sim.run().map_err(|e| format!("Scenario '{name}': simulation failed: {e}"))?;

        let world = lock(&world);
        (self.oracle)(&world).map_err(|e| format!("Scenario '{name}': {e}"))
    }
}

struct Plan {
    card_host: Option<String>,
    vault_host: Option<String>,
    operations: Vec<Operation>,
    garbage_frames: usize,
    seed: u64,
}

fn lock(world: &Mutex<World>) -> MutexGuard<'_, World> {
    world.lock().unwrap_or_else(PoisonError::into_inner)
}

fn single_host(
    name: &str,
    endpoints: &[(String, Role)],
    role: Role,
) -> Result<Option<String>, String> {
    let mut hosts = endpoints.iter().filter(|(_, r)| *r == role).map(|(host, _)| host.clone());
    let first = hosts.next();
    if hosts.next().is_some() {
        return Err(format!("Scenario '{name}': at most one {role} endpoint is supported"));
    }
    Ok(first)
}

async fn serve_endpoint(role: Role, store: SharedStore) -> turmoil::Result {
    let transport = SimTransport::bind_default().await?;
    let result = match role {
        Role::Card => run_runtime(Card::new(), store, &transport).await,
        Role::SecurityModule => run_runtime(Vault::new(), store, &transport).await,
    };

    match result {
        // The controller hanging up ends the simulation normally
        Ok(()) | Err(RuntimeError::Transport(_)) => Ok(()),
        Err(err) => Err(err.into()),
    }
}

async fn run_runtime<E: Endpoint>(
    endpoint: E,
    store: SharedStore,
    transport: &SimTransport,
) -> Result<(), RuntimeError> {
    let mut runtime = Runtime::new(endpoint, store, RuntimeConfig::default());
    runtime.serve(transport).await
}

async fn connect(host: &str) -> std::io::Result<SimController> {
    let mut attempt = 0;
    loop {
        match SimTransport::connect_to(host).await {
            Ok(stream) => {
                let (reader, writer) = tokio::io::split(stream);
                return Ok(Controller::new(reader, writer));
            },
            Err(err) if attempt + 1 < CONNECT_ATTEMPTS => {
                attempt += 1;
                debug!(host, attempt, error = %err, "endpoint not listening yet");
                tokio::time::sleep(Duration::from_millis(10)).await;
            },
            Err(err) => return Err(err),
        }
    }
}

fn garbage_frame(rng: &mut ChaCha8Rng) -> Vec<u8> {
    loop {
        let mut frame = vec![0u8; rng.gen_range(0..=MAX_GARBAGE_LEN)];
        rng.fill(&mut frame[..]);
        if !literals::matches(&frame, literals::READY) {
            return frame;
        }
    }
}

async fn drive(plan: Plan, world: Arc<Mutex<World>>) -> turmoil::Result {
    let mut card = match &plan.card_host {
        Some(host) => Some(connect(host).await?),
        None => None,
    };
    let mut vault = match &plan.vault_host {
        Some(host) => Some(connect(host).await?),
        None => None,
    };

    let mut rng = ChaCha8Rng::seed_from_u64(plan.seed);
    for controller in card.iter_mut().chain(vault.iter_mut()) {
        for _ in 0..plan.garbage_frames {
            controller.inject_garbage(&garbage_frame(&mut rng)).await?;
            lock(&world).record_garbage_echo();
        }
    }

    let mut atm = Atm::new(card, vault);
    let mut model = ModelWorld::new();
    for operation in plan.operations {
        let expected = model.apply(&operation);
        let observed = atm.perform(&operation).await?;
        lock(&world).record_step(Step { operation, observed, expected });
    }

    if let (Some(host), Ok(card)) = (&plan.card_host, atm.card()) {
        lock(&world).record_ready_sent(host, card.ready_sent());
    }
    if let (Some(host), Ok(vault)) = (&plan.vault_host, atm.vault()) {
        lock(&world).record_ready_sent(host, vault.ready_sent());
    }
    Ok(())
}
