// Copyright 2021 The Matrix.org Foundation C.I.C.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Forwarding of our `tracing` output to a logger of the embedding
//! application.

use std::{
    io::{Result, Write},
    sync::{Arc, Mutex},
};

use tracing_core::{Level, Metadata, Subscriber};
use tracing_subscriber::{fmt::MakeWriter, EnvFilter};

/// Trait that can be used to forward Rust logs to an application specific
/// logger.
pub trait Logger: Send {
    /// Called every time the Rust side wants to post a debug log line.
    fn log_debug(&self, message: String);

    /// Called every time the Rust side wants to post an info log line.
    fn log_info(&self, message: String);

    /// Called every time the Rust side wants to post a warning log line.
    fn log_warn(&self, message: String);

    /// Called every time the Rust side wants to post an error log line.
    fn log_error(&self, message: String);
}

struct LoggerWrapper {
    inner: Arc<Mutex<Box<dyn Logger>>>,
    level: Level,
}

impl Write for LoggerWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        let message = String::from_utf8_lossy(buf).trim_end().to_owned();
        let logger = self.inner.lock().unwrap();

        match self.level {
            Level::ERROR => logger.log_error(message),
            Level::WARN => logger.log_warn(message),
            Level::INFO => logger.log_info(message),
            // The embedding loggers don't know a trace level.
            Level::DEBUG | Level::TRACE => logger.log_debug(message),
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

impl MakeWriter<'_> for LoggerWrapper {
    type Writer = LoggerWrapper;

    fn make_writer(&self) -> Self::Writer {
        Self { inner: self.inner.clone(), level: Level::DEBUG }
    }

    fn make_writer_for(&self, meta: &Metadata<'_>) -> Self::Writer {
        Self { inner: self.inner.clone(), level: *meta.level() }
    }
}

fn subscriber(logger: Box<dyn Logger>, filter: EnvFilter) -> impl Subscriber + Send + Sync {
    let writer = LoggerWrapper { inner: Arc::new(Mutex::new(logger)), level: Level::DEBUG };

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(filter)
        .with_ansi(false)
        .without_time()
        .finish()
}

/// Set the logger that should be used to forward Rust logs.
///
/// The `RUST_LOG` environment variable is honored, on top of it this crate
/// logs at the debug level. Calling this more than once has no effect.
pub fn set_logger(logger: Box<dyn Logger>) {
    let filter = EnvFilter::from_default_env().add_directive(
        "matrix_sdk_trust=debug".parse().expect("Can't parse logging filter directive"),
    );

    let _ = tracing::subscriber::set_global_default(subscriber(logger, filter));
}
