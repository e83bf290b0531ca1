use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use hebi_launcher::LauncherState;
use hebi_launcher::activity::ActivityTracker;
use hebi_launcher::config::ConfHandle;
use hebi_launcher::directory::LdapDirectory;
use hebi_launcher::events::{EventBroadcaster, HeartbeatTask};
use hebi_launcher::ingress::IngressMutator;
use hebi_launcher::kubernetes::{KubeOrchestrator, Orchestrator};
use hebi_launcher::listener::HttpListener;
use hebi_launcher::manifest::BuiltinRenderer;
use hebi_launcher::persistence::{self, ActivityFlushTask};
use hebi_launcher::reaper::ReaperTask;
use hebi_task::{ShutdownHandle, Tasks};
use tokio::runtime::{self, Runtime};
use tracing_subscriber::EnvFilter;

pub const SERVICE_NAME: &str = "hebi-launcher";

enum LauncherRunState {
    Stopped,
    Running {
        shutdown_handle: ShutdownHandle,
        runtime: Runtime,
    },
}

pub struct LauncherService {
    conf_handle: ConfHandle,
    state: LauncherRunState,
}

impl LauncherService {
    pub fn load(conf_handle: ConfHandle) -> anyhow::Result<Self> {
        init_logging();

        info!(version = env!("CARGO_PKG_VERSION"));

        let conf = conf_handle.get_conf();
        debug!(?conf.run_mode, %conf.bind_addr, %conf.namespace, "Configuration loaded");

        Ok(LauncherService {
            conf_handle,
            state: LauncherRunState::Stopped,
        })
    }

    pub fn start(&mut self) -> anyhow::Result<()> {
        let runtime = runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .context("failed to create runtime")?;

        let conf_handle = self.conf_handle.clone();

        // spawn_tasks needs to run inside the runtime in order to bind the
        // socket and build the Kubernetes client.
        let tasks = runtime.block_on(spawn_tasks(conf_handle))?;

        trace!("Tasks created");

        let mut join_all = futures::future::select_all(tasks.inner.into_iter().map(|child| Box::pin(child.join())));

        runtime.spawn(async {
            loop {
                let (result, _, rest) = join_all.await;

                match result {
                    Ok(Ok(())) => trace!("A task terminated gracefully"),
                    Ok(Err(error)) => error!(error = format!("{error:#}"), "A task failed"),
                    Err(error) => error!(%error, "Something went very wrong with a task"),
                }

                if rest.is_empty() {
                    break;
                } else {
                    join_all = futures::future::select_all(rest);
                }
            }
        });

        self.state = LauncherRunState::Running {
            shutdown_handle: tasks.shutdown_handle,
            runtime,
        };

        info!("{} service started", SERVICE_NAME);

        Ok(())
    }

    pub fn stop(&mut self) {
        match std::mem::replace(&mut self.state, LauncherRunState::Stopped) {
            LauncherRunState::Stopped => {
                info!("Attempted to stop the launcher service, but it's already stopped");
            }
            LauncherRunState::Running {
                shutdown_handle,
                runtime,
            } => {
                info!("Stopping launcher service");

                // Send shutdown signals to all tasks
                shutdown_handle.signal();

                runtime.block_on(async move {
                    tokio::select! {
                        _ = shutdown_handle.all_closed() => {
                            debug!("All tasks closed gracefully");
                        }
                        _ = tokio::time::sleep(Duration::from_secs(10)) => {
                            warn!("Some tasks didn’t terminate at all");
                        }
                    }
                });

                runtime.shutdown_timeout(Duration::from_secs(3));

                self.state = LauncherRunState::Stopped;
            }
        }
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn spawn_tasks(conf_handle: ConfHandle) -> anyhow::Result<Tasks> {
    let conf = conf_handle.get_conf();

    let activity = ActivityTracker::new();

    match persistence::load(&conf.activity_file) {
        Ok(Some(snapshot)) => {
            info!(
                entries = snapshot.len(),
                path = %conf.activity_file,
                "Restored activity snapshot from a previous launcher instance",
            );
            activity.merge(snapshot);
        }
        Ok(None) => {
            info!(
                path = %conf.activity_file,
                "No activity snapshot found, assuming no previous session timestamps exist",
            );
        }
        Err(error) => {
            // An unreadable snapshot must not keep the launcher down.
            warn!(error = format!("{error:#}"), "Failed to read activity snapshot; starting empty");
        }
    }

    let orchestrator: Arc<dyn Orchestrator> = Arc::new(
        KubeOrchestrator::connect(&conf)
            .await
            .context("failed to initialise the Kubernetes client")?,
    );

    let directory = Arc::new(LdapDirectory::new(&conf.ldap_url));

    let renderer = Arc::new(BuiltinRenderer {
        image: conf.session_image.clone(),
    });

    let events = EventBroadcaster::new();
    let ingress = IngressMutator::new(Arc::clone(&orchestrator), conf.ingress_host.clone());

    let mut tasks = Tasks::new();

    let state = LauncherState {
        conf_handle: conf_handle.clone(),
        activity: activity.clone(),
        events: events.clone(),
        orchestrator,
        directory,
        renderer,
        ingress,
        shutdown_signal: tasks.shutdown_signal.clone(),
    };

    let listener = HttpListener::init_and_bind(conf.bind_addr, state.clone())
        .await
        .with_context(|| format!("failed to initialize listener on {}", conf.bind_addr))?;
    tasks.register(listener);

    tasks.register(HeartbeatTask {
        events,
        interval: conf.heartbeat_interval,
    });

    tasks.register(ReaperTask { state });

    tasks.register(ActivityFlushTask {
        activity,
        path: conf.activity_file.clone(),
        interval: conf.activity_flush_interval,
    });

    Ok(tasks)
}
