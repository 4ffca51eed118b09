use std::sync::Arc;
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use flume::{Receiver, Sender};

use crate::config::OrchestratorConfig;
use crate::invoker::ModelInvoker;
use crate::orchestrator::{
    ChannelHumanInput, HumanInput, Orchestrator, OrchestratorEvent, RunReport, Seed,
};

pub struct ConversationRuntime {
    pub config: OrchestratorConfig,
    pub orchestrator: Arc<Orchestrator>,
    event_tx: Sender<OrchestratorEvent>,
}

pub struct ConversationRuntimeBuilder {
    config: OrchestratorConfig,
    event_tx: Sender<OrchestratorEvent>,
    invoker: Option<Arc<dyn ModelInvoker>>,
    human_input: Option<Arc<dyn HumanInput>>,
}

impl ConversationRuntimeBuilder {
    pub fn new(config: OrchestratorConfig, event_tx: Sender<OrchestratorEvent>) -> Self {
        Self {
            config,
            event_tx,
            invoker: None,
            human_input: None,
        }
    }

    /// Replace the command-line runner built from the config.
    pub fn with_invoker(mut self, invoker: Arc<dyn ModelInvoker>) -> Self {
        self.invoker = Some(invoker);
        self
    }

    pub fn with_human_input(mut self, human_input: Arc<dyn HumanInput>) -> Self {
        self.human_input = Some(human_input);
        self
    }

    pub fn with_human_channel(self, human_rx: Receiver<String>) -> Self {
        self.with_human_input(Arc::new(ChannelHumanInput::new(human_rx)))
    }

    pub fn build(self) -> Result<ConversationRuntime> {
        let config = self.config;
        config.validate().context("Invalid orchestrator config")?;

        let script = config
            .turn_script()
            .context("Failed to build turn script")?;
        let personas = config.persona_set();

        let invoker: Arc<dyn ModelInvoker> = match self.invoker {
            Some(invoker) => invoker,
            None => {
                let invoker = config.invoker();
                tracing::info!(
                    "Model runner: {} {}",
                    invoker.program(),
                    config.runner_args.join(" ")
                );
                Arc::new(invoker)
            }
        };
        let human_input = self
            .human_input
            .context("No human input source configured")?;

        let orchestrator = Orchestrator::new(
            personas,
            script,
            config.settings(),
            invoker,
            human_input,
            self.event_tx.clone(),
        )
        .context("Turn script does not match the persona set")?;

        tracing::info!(
            "Loaded {} persona(s), {} scripted turn(s), ceiling {}",
            config.personas.len(),
            orchestrator.script().len(),
            config.max_inferences
        );

        Ok(ConversationRuntime {
            config,
            orchestrator: Arc::new(orchestrator),
            event_tx: self.event_tx,
        })
    }
}

impl ConversationRuntime {
    pub fn bootstrap(
        config: OrchestratorConfig,
        event_tx: Sender<OrchestratorEvent>,
        human_rx: Receiver<String>,
    ) -> Result<Self> {
        ConversationRuntimeBuilder::new(config, event_tx)
            .with_human_channel(human_rx)
            .build()
    }

    /// Run the conversation on its own thread and tokio runtime so the caller
    /// stays free to render events and collect human input. If the loop
    /// cannot start or panics, an `Aborted` event is sent so listeners stop.
    pub fn spawn_conversation(&self, seed: Seed) -> JoinHandle<Result<RunReport>> {
        let orchestrator = self.orchestrator.clone();
        let event_tx = self.event_tx.clone();
        std::thread::spawn(move || {
            let rt = match tokio::runtime::Runtime::new() {
                Ok(rt) => rt,
                Err(e) => {
                    let message = format!("Failed to start conversation runtime: {}", e);
                    tracing::error!("{}", message);
                    let _ = event_tx.send(OrchestratorEvent::Aborted(message.clone()));
                    return Err(anyhow::anyhow!(message));
                }
            };

            rt.block_on(async move {
                let task = tokio::spawn(async move { orchestrator.run(seed).await });
                match task.await {
                    Ok(result) => result.map_err(|e| {
                        tracing::error!("Conversation loop error: {}", e);
                        anyhow::Error::new(e)
                    }),
                    Err(e) => {
                        let message = format!("Conversation task failed: {}", e);
                        tracing::error!("{}", message);
                        let _ = event_tx.send(OrchestratorEvent::Aborted(message.clone()));
                        Err(anyhow::anyhow!(message))
                    }
                }
            })
        })
    }
}
