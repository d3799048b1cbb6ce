//! Folds per-layer pull events into a single download-phase percentage

use crate::progress::bands::{DOWNLOAD_FLOOR, DOWNLOAD_SPAN};
use crate::progress::LayerProgress;
use crate::runtime::{LayerEvent, LayerStatus};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Applied {
    pub first_seen: bool,
    pub reached_terminal: bool,
    pub overall: u8,
}

#[derive(Debug, Default)]
pub struct LayerAggregator {
    layers: HashMap<String, LayerState>,
    total_layers: usize,
}

#[derive(Debug, Clone, Copy)]
struct LayerState {
    status: LayerStatus,
    percent: u8,
}

impl LayerAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: &LayerEvent) -> Applied {
        let first_seen = !self.layers.contains_key(&event.layer_id);
        if first_seen {
            self.total_layers += 1;
        }

        let state = self
            .layers
            .entry(event.layer_id.clone())
            .or_insert(LayerState {
                status: event.status,
                percent: 0,
            });
        let was_terminal = state.status.is_terminal() && !first_seen;

        // A pinned layer stays at 100 whatever the runtime reports afterwards
        if !was_terminal {
            state.status = event.status;
            if event.status.is_terminal() {
                state.percent = 100;
            } else if let Some(percent) = byte_percent(event.current, event.total) {
                state.percent = state.percent.max(percent);
            }
        }

        Applied {
            first_seen,
            reached_terminal: !was_terminal && state.status.is_terminal(),
            overall: self.overall(),
        }
    }

    /// `max(5, floor(sum(percent) / (layers * 100) * 60))`
    pub fn overall(&self) -> u8 {
        if self.total_layers == 0 {
            return DOWNLOAD_FLOOR;
        }
        let sum: u64 = self.layers.values().map(|l| l.percent as u64).sum();
        let scaled = sum * DOWNLOAD_SPAN / (self.total_layers as u64 * 100);
        (scaled as u8).max(DOWNLOAD_FLOOR)
    }

    pub fn total_layers(&self) -> usize {
        self.total_layers
    }

    pub fn completed_layers(&self) -> usize {
        self.layers.values().filter(|l| l.status.is_terminal()).count()
    }

    pub fn snapshot(&self, layer_id: &str) -> Option<LayerProgress> {
        self.layers.get(layer_id).map(|l| LayerProgress {
            status: l.status.to_string(),
            percent: l.percent,
        })
    }
}

fn byte_percent(current: Option<u64>, total: Option<u64>) -> Option<u8> {
    match (current, total) {
        (Some(current), Some(total)) if total > 0 => Some((current.min(total) * 100 / total) as u8),
        _ => None,
    }
}
