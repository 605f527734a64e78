#![allow(dead_code)]

use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use seqflow_core::{ActionError, Executor, ExecutorBuilder};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        fmt().with_env_filter(filter).with_test_writer().init();
    });
}

/// Collects every error delivered to an executor's error handler.
#[derive(Clone, Default)]
pub struct ErrorLog(Arc<Mutex<Vec<ActionError>>>);

impl ErrorLog {
    pub fn attach(&self, builder: ExecutorBuilder) -> ExecutorBuilder {
        let log = self.0.clone();
        builder.error_handler(move |e| log.lock().unwrap().push(e.clone()))
    }

    pub fn errors(&self) -> Vec<ActionError> {
        self.0.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.errors().iter().map(|e| e.to_string()).collect()
    }
}

/// An executor with its consumer loop already running.
pub struct Running {
    pub executor: Executor,
    pub token: CancellationToken,
    pub worker: JoinHandle<seqflow_core::Result<()>>,
}

impl Running {
    pub fn start(executor: Executor) -> Self {
        init_tracing();
        let token = CancellationToken::new();
        let worker = executor.spawn(token.clone());
        Self {
            executor,
            token,
            worker,
        }
    }

    pub fn with_errors(window: Duration) -> (Self, ErrorLog) {
        let log = ErrorLog::default();
        let executor = log
            .attach(Executor::builder().batch_window(window))
            .build()
            .expect("valid executor config");
        (Self::start(executor), log)
    }

    pub async fn flush(&self) {
        self.executor
            .wait_flush(&CancellationToken::new())
            .await
            .expect("flush should succeed");
    }

    pub async fn stop(self) {
        self.executor.shutdown().await;
        self.worker
            .await
            .expect("consumer task panicked")
            .expect("consumer loop failed");
    }
}

/// Shared log that actions append to.
pub fn recorder<T: Send + 'static>() -> Arc<Mutex<Vec<T>>> {
    Arc::new(Mutex::new(Vec::new()))
}
