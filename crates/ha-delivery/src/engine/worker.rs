// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Flush worker body and batch failure routing.

use super::{recovery, Inner};
use crate::sink::{SinkClient, WriteError};
use crate::store::{OverflowStore, PAYLOAD_RESOLUTION};
use ha_measurement::{line_protocol, Measurement};
use std::sync::Arc;
use tracing::{debug, error, warn};

pub(crate) fn run<S, O>(inner: Arc<Inner<S, O>>)
where
    S: SinkClient + 'static,
    O: OverflowStore + 'static,
{
    if should_recover(&inner) {
        recovery::run(&inner);
    }

    inner.signal.wait_timeout(inner.config.flush_delay);

    // Items enqueued from here on belong to the next worker.
    let snapshot = inner.queue.lock().len();
    let mut consumed = 0;
    while consumed < snapshot && !inner.signal.is_triggered() {
        let batch: Vec<Measurement> = {
            let mut queue = inner.queue.lock();
            let take = inner
                .config
                .batch_size
                .min(snapshot - consumed)
                .min(queue.len());
            queue.drain(..take).collect()
        };
        if batch.is_empty() {
            break;
        }
        consumed += batch.len();
        write_batch(&inner, batch);
    }

    debug!(consumed, "flush worker done");
    inner.worker_finished();
}

fn should_recover<S, O>(inner: &Inner<S, O>) -> bool
where
    S: SinkClient,
    O: OverflowStore,
{
    if inner.state.is_recovering() || inner.state.is_unauthorized() || !inner.state.is_connected()
    {
        return false;
    }
    match inner.store.count() {
        Ok(count) => count > 0,
        Err(e) => {
            error!(error = %e, "overflow store unavailable, skipping recovery");
            false
        }
    }
}

fn write_batch<S, O>(inner: &Inner<S, O>, batch: Vec<Measurement>)
where
    S: SinkClient,
    O: OverflowStore,
{
    if inner.state.is_unauthorized() || !inner.state.is_connected() {
        persist(inner, &batch);
        return;
    }

    match inner.sink.write_batch(&batch) {
        Ok(()) => {
            debug!(count = batch.len(), "batch delivered");
            inner.state.add_delivered(batch.len());
        }
        Err(WriteError::Unauthorized(detail)) => {
            inner.state.mark_unauthorized(&detail);
            persist(inner, &batch);
        }
        Err(WriteError::MalformedPayload(detail)) => {
            warn!(
                count = batch.len(),
                detail = %detail,
                "batch rejected as malformed, retrying records one by one"
            );
            for measurement in batch {
                write_single(inner, measurement);
            }
        }
        Err(WriteError::Unreachable(detail)) => {
            debug!(detail = %detail, "batch write failed");
            inner.state.set_connected(false);
            persist(inner, &batch);
        }
        Err(WriteError::Other(detail)) => {
            error!(
                count = batch.len(),
                detail = %detail,
                "unexpected sink error, batch dropped"
            );
            inner.state.add_dropped(batch.len());
        }
    }
}

fn write_single<S, O>(inner: &Inner<S, O>, measurement: Measurement)
where
    S: SinkClient,
    O: OverflowStore,
{
    let batch = std::slice::from_ref(&measurement);
    if inner.state.is_unauthorized() || !inner.state.is_connected() {
        persist(inner, batch);
        return;
    }

    match inner.sink.write_one(&measurement) {
        Ok(()) => inner.state.add_delivered(1),
        Err(WriteError::Unauthorized(detail)) => {
            inner.state.mark_unauthorized(&detail);
            persist(inner, batch);
        }
        Err(WriteError::MalformedPayload(detail)) => {
            error!(
                device = %measurement.device,
                detail = %detail,
                "measurement rejected as malformed, dropped"
            );
            inner.state.add_dropped(1);
        }
        Err(WriteError::Unreachable(detail)) => {
            debug!(detail = %detail, "single write failed");
            inner.state.set_connected(false);
            persist(inner, batch);
        }
        Err(WriteError::Other(detail)) => {
            error!(
                device = %measurement.device,
                detail = %detail,
                "unexpected sink error, measurement dropped"
            );
            inner.state.add_dropped(1);
        }
    }
}

/// Route measurements to the overflow store. A storage fault loses them.
///
/// Measurements that cannot be stored as a decodable payload are dropped as
/// malformed, the rest of the batch is stored.
pub(crate) fn persist<S, O>(inner: &Inner<S, O>, batch: &[Measurement])
where
    O: OverflowStore,
{
    if batch
        .iter()
        .all(|m| line_protocol::validate(m, PAYLOAD_RESOLUTION).is_ok())
    {
        append(inner, batch);
        return;
    }

    let mut storable = Vec::with_capacity(batch.len());
    for measurement in batch {
        match line_protocol::validate(measurement, PAYLOAD_RESOLUTION) {
            Ok(()) => storable.push(measurement.clone()),
            Err(e) => {
                error!(
                    device = %measurement.device,
                    error = %e,
                    "measurement cannot be stored for replay, dropped"
                );
                inner.state.add_dropped(1);
            }
        }
    }
    if !storable.is_empty() {
        append(inner, &storable);
    }
}

fn append<S, O>(inner: &Inner<S, O>, batch: &[Measurement])
where
    O: OverflowStore,
{
    match inner.store.append_batch(batch) {
        Ok(stored) => {
            debug!(count = stored, "measurements overflowed");
            inner.state.add_overflowed(stored);
        }
        Err(e) => {
            error!(
                count = batch.len(),
                error = %e,
                "overflow store failed, measurements lost"
            );
            inner.state.add_dropped(batch.len());
        }
    }
}
