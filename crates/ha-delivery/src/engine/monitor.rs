// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Periodic sink health probe.

use super::Inner;
use crate::sink::SinkClient;
use crate::store::OverflowStore;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

pub(crate) fn spawn<S, O>(inner: Arc<Inner<S, O>>) -> std::io::Result<JoinHandle<()>>
where
    S: SinkClient + 'static,
    O: OverflowStore + 'static,
{
    thread::Builder::new()
        .name("ha-health".to_string())
        .spawn(move || run(inner))
}

fn run<S, O>(inner: Arc<Inner<S, O>>)
where
    S: SinkClient + 'static,
    O: OverflowStore + 'static,
{
    debug!("health monitor started");

    loop {
        if inner.signal.wait_timeout(inner.config.health_interval) {
            break;
        }
        // Probing stops for good once credentials were rejected.
        if inner.state.is_unauthorized() {
            info!("health monitor stopped after credential failure");
            break;
        }

        let healthy = inner.sink.health_probe();
        inner.state.set_connected(healthy);

        // Overflow is otherwise only replayed when new data arrives.
        if healthy && inner.store.count().map_or(false, |count| count > 0) {
            inner.schedule();
        }
    }

    debug!("health monitor stopped");
}
