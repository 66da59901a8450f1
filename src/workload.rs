//! Seeded synthetic traces for benchmarks, tests and the `gen` command.
//!
//! Records come out in timestamp order with consistent call nesting per
//! thread. [`TraceGenerator::arrival_order`] then delays a share of them by
//! a bounded number of positions, the way events from several producer
//! threads reach the store.

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::storage::record::{BehaviorCall, EventRecord, OutputStream, RecordHeader, RecordPayload};
use crate::types::{ObjectId, ObjectValue};

/// Shape of a generated trace.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    /// Threads, numbered from 1.
    pub threads: u32,
    /// Distinct behavior ids, numbered from 1.
    pub behaviors: u32,
    /// Distinct field ids, numbered from 1.
    pub fields: u32,
    /// Distinct object ids, numbered from 1.
    pub objects: u64,
    /// Deepest call nesting per thread.
    pub max_depth: u32,
    /// Largest arrival delay, in positions.
    pub max_delay: usize,
    /// Share of events that arrive late.
    pub delay_ratio: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            threads: 4,
            behaviors: 200,
            fields: 64,
            objects: 5_000,
            max_depth: 24,
            max_delay: 32,
            delay_ratio: 0.05,
        }
    }
}

/// Deterministic trace source.
pub struct TraceGenerator {
    rng: ChaCha8Rng,
    config: WorkloadConfig,
    clock: u64,
    stacks: Vec<Vec<(u32, u64)>>,
}

impl TraceGenerator {
    /// Generator whose output depends only on `seed` and `config`.
    pub fn new(seed: u64, config: WorkloadConfig) -> Self {
        let threads = config.threads.max(1) as usize;
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            config,
            clock: 0,
            stacks: vec![Vec::new(); threads],
        }
    }

    /// Settings in use.
    pub fn config(&self) -> &WorkloadConfig {
        &self.config
    }

    /// Produces `events` records in strictly increasing timestamp order.
    pub fn generate(&mut self, events: usize) -> Vec<EventRecord> {
        (0..events).map(|_| self.next_record()).collect()
    }

    /// Next record; its timestamp is above every earlier one.
    pub fn next_record(&mut self) -> EventRecord {
        self.clock += self.rng.gen_range(1..=3);
        let slot = self.rng.gen_range(0..self.stacks.len());
        let thread = slot as u32 + 1;
        let (depth, parent_timestamp) = {
            let stack = &self.stacks[slot];
            (stack.len() as u32, stack.last().map_or(0, |&(_, ts)| ts))
        };
        let mut header = RecordHeader {
            thread,
            depth,
            timestamp: self.clock,
            advice_cflow: Vec::new(),
            probe: self.rng.gen_range(1..=1_000),
            parent_timestamp,
        };
        if self.rng.gen_bool(0.05) {
            header.advice_cflow.push(self.rng.gen_range(1..=8));
        }

        let roll = self.rng.gen_range(0..100u32);
        let payload = if roll < 20 && depth < self.config.max_depth {
            let behavior = self.behavior();
            self.stacks[slot].push((behavior, self.clock));
            self.call_payload(behavior)
        } else if roll < 35 && depth > 0 {
            let (behavior, _) = self.stacks[slot].pop().unwrap_or((0, 0));
            header.depth = depth - 1;
            RecordPayload::BehaviorExit {
                behavior,
                has_thrown: self.rng.gen_bool(0.02),
                result: self.value(),
            }
        } else if roll < 60 {
            RecordPayload::FieldWrite {
                field: self.rng.gen_range(1..=self.config.fields.max(1)),
                target: self.object(),
                value: self.value(),
            }
        } else if roll < 68 {
            RecordPayload::ArrayWrite {
                target: self.object(),
                index: self.rng.gen_range(0..2_048),
                value: self.value(),
            }
        } else if roll < 76 {
            RecordPayload::VariableWrite {
                variable: self.rng.gen_range(0..32),
                value: self.value(),
            }
        } else if roll < 80 {
            RecordPayload::NewArray {
                target: self.object(),
                base_type: self.rng.gen_range(1..=16),
                size: self.rng.gen_range(0..4_096),
            }
        } else if roll < 84 {
            RecordPayload::InstanceOf {
                object: self.object(),
                type_id: self.rng.gen_range(1..=64),
                passed: self.rng.gen_bool(0.5),
            }
        } else if roll < 87 {
            let behavior = match self.stacks[slot].last() {
                Some(&(behavior, _)) => behavior,
                None => self.behavior(),
            };
            RecordPayload::Exception {
                behavior,
                exception: self.object(),
            }
        } else if roll < 90 {
            let len = self.rng.gen_range(0..48);
            RecordPayload::Output {
                stream: if self.rng.gen_bool(0.8) { OutputStream::Out } else { OutputStream::Err },
                text: (0..len).map(|_| self.rng.gen_range(b'a'..=b'z') as char).collect(),
            }
        } else if roll < 94 {
            let len = self.rng.gen_range(0..64);
            RecordPayload::Registration {
                object: ObjectId(self.rng.gen_range(1..=self.config.objects.max(1))),
                class_id: self.rng.gen_range(1..=128),
                data: (0..len).map(|_| self.rng.gen()).collect(),
            }
        } else {
            RecordPayload::FieldWrite {
                field: self.rng.gen_range(1..=self.config.fields.max(1)),
                target: ObjectValue::Null,
                value: self.value(),
            }
        };
        EventRecord::new(header, payload)
    }

    /// Reorders `items` so a `delay_ratio` share of them arrives up to
    /// `max_delay` positions late. No item ends up more than `max_delay`
    /// positions from its place, so a reordering window wider than
    /// `max_delay` restores the original order.
    pub fn arrival_order<T>(&mut self, items: Vec<T>) -> Vec<T> {
        let mut keyed: Vec<(usize, usize, T)> = items
            .into_iter()
            .enumerate()
            .map(|(i, item)| {
                let delay = if self.config.max_delay > 0 && self.rng.gen_bool(self.config.delay_ratio.clamp(0.0, 1.0)) {
                    self.rng.gen_range(1..=self.config.max_delay)
                } else {
                    0
                };
                (i + delay, i, item)
            })
            .collect();
        keyed.sort_by_key(|&(arrival, i, _)| (arrival, i));
        keyed.into_iter().map(|(_, _, item)| item).collect()
    }

    fn behavior(&mut self) -> u32 {
        self.rng.gen_range(1..=self.config.behaviors.max(1))
    }

    fn object(&mut self) -> ObjectValue {
        ObjectValue::Object(ObjectId(self.rng.gen_range(1..=self.config.objects.max(1))))
    }

    fn call_payload(&mut self, behavior: u32) -> RecordPayload {
        let argc = self.rng.gen_range(0..4);
        let call = BehaviorCall {
            arguments: (0..argc).map(|_| self.value()).collect(),
            called: Some(behavior),
            executed: if self.rng.gen_bool(0.9) { Some(behavior) } else { Some(self.behavior()) },
            direct_parent: self.rng.gen_bool(0.8),
            target: self.object(),
        };
        match self.rng.gen_range(0..10) {
            0 => RecordPayload::Instantiation(call),
            1 => RecordPayload::SuperCall(call),
            _ => RecordPayload::MethodCall(call),
        }
    }

    fn value(&mut self) -> ObjectValue {
        match self.rng.gen_range(0..8) {
            0 => ObjectValue::Null,
            1 | 2 => self.object(),
            3 => ObjectValue::Int(self.rng.gen()),
            4 => ObjectValue::Long(self.rng.gen()),
            5 => ObjectValue::Boolean(self.rng.gen()),
            6 => ObjectValue::Double(self.rng.gen_range(-1e6..1e6)),
            _ => ObjectValue::Char(self.rng.gen_range(32..127)),
        }
    }
}
