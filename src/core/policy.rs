//! Activation policy: which actuators to fire for an event, and how hard.
//!
//! The policy owns one [`PolicyState`] per `(source_id, feature_type)` and
//! is only ever called from the dispatcher thread. It performs no I/O.
//!
//! Rules, in order:
//! - rest labels reset the key's state and actuate nothing
//! - an identical label within `cooldown` of its last actuation is
//!   suppressed, even if other labels were seen in between
//! - `escalation_count` triggers of one label within `escalation_window`
//!   escalate: one level stronger, fanned out to every actuator
//! - a label change restarts actuator rotation
//! - otherwise one actuator is chosen, rotating after `rotation_uses` uses

use crate::actuator::{ActionType, ActuationParams, ActuationRequest, ActuatorId, ActuatorKind};
use crate::collector::FeatureType;
use crate::config::PolicyConfig;
use crate::core::event::{Event, Label};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};

/// Feedback strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Intensity {
    Low,
    Medium,
    High,
    Critical,
}

impl Intensity {
    /// Strength carried by a label.
    pub fn for_label(label: &Label) -> Intensity {
        match label.as_str() {
            "LOW" => Intensity::Low,
            "MEDIUM" | "WALKING" | "NON_DANGEROUS" => Intensity::Medium,
            "HIGH" | "WALKING_FAST" => Intensity::High,
            "CRITICAL" | "RUNNING" | "DANGEROUS" => Intensity::Critical,
            _ => Intensity::Low,
        }
    }

    pub fn raised(self) -> Intensity {
        match self {
            Intensity::Low => Intensity::Medium,
            Intensity::Medium => Intensity::High,
            Intensity::High | Intensity::Critical => Intensity::Critical,
        }
    }

    fn index(self) -> usize {
        match self {
            Intensity::Low => 0,
            Intensity::Medium => 1,
            Intensity::High => 2,
            Intensity::Critical => 3,
        }
    }
}

const LEVEL_COLORS: [[u8; 4]; 4] = [
    [0, 255, 0, 0],
    [255, 255, 0, 0],
    [255, 165, 0, 0],
    [255, 0, 0, 0],
];
const WHITE: [u8; 4] = [255, 255, 255, 0];
const THERMAL_DUTY: [u8; 4] = [30, 50, 80, 100];
const ACTIVITY_SCALE: [u8; 4] = [25, 50, 75, 100];
const VIBRATION_MS: u32 = 1000;

/// Build the parameters an actuator kind needs for an event.
pub fn params_for(
    kind: ActuatorKind,
    feature: FeatureType,
    label: &Label,
    level: Intensity,
) -> ActuationParams {
    let activity = feature == FeatureType::Activity;
    let i = level.index();
    match kind {
        ActuatorKind::LedStrip if activity => ActuationParams::Light {
            color: WHITE,
            speed: ACTIVITY_SCALE[i],
            intensity: 100,
        },
        ActuatorKind::LedStrip => ActuationParams::Light {
            color: LEVEL_COLORS[i],
            speed: 100,
            intensity: 100,
        },
        ActuatorKind::Speaker => {
            let name = label.as_str().to_lowercase();
            let clip = match feature {
                FeatureType::Temperature => format!("temperature_{name}.mp3"),
                FeatureType::Activity => format!("{name}.mp3"),
                _ => format!("stereotypy_{name}.mp3"),
            };
            ActuationParams::Sound { clip }
        }
        ActuatorKind::VibrationMotor => ActuationParams::Vibration {
            duty: if activity {
                ACTIVITY_SCALE[i]
            } else {
                THERMAL_DUTY[i]
            },
            duration_ms: VIBRATION_MS,
        },
        ActuatorKind::Logger => ActuationParams::Record {
            label: label.to_string(),
        },
    }
}

/// Trigger history of one label under one key.
#[derive(Debug, Default)]
struct LabelHistory {
    last_triggered: Option<DateTime<Utc>>,
    /// Trigger times inside the escalation window
    recent: VecDeque<DateTime<Utc>>,
}

/// Mutable decision memory for one `(source_id, feature_type)`.
#[derive(Debug, Default)]
struct PolicyState {
    last_label: Option<Label>,
    rotation_index: usize,
    uses: u32,
    /// Cooldown and escalation memory, kept across label changes
    labels: HashMap<Label, LabelHistory>,
}

pub struct ActivationPolicy {
    config: PolicyConfig,
    cooldown: chrono::Duration,
    escalation_window: chrono::Duration,
    actuators: Vec<(ActuatorId, ActuatorKind)>,
    states: HashMap<(String, FeatureType), PolicyState>,
}

impl ActivationPolicy {
    pub fn new(config: PolicyConfig, actuators: Vec<(ActuatorId, ActuatorKind)>) -> Self {
        Self {
            cooldown: to_chrono(config.cooldown),
            escalation_window: to_chrono(config.escalation_window),
            config,
            actuators,
            states: HashMap::new(),
        }
    }

    pub fn actuators(&self) -> &[(ActuatorId, ActuatorKind)] {
        &self.actuators
    }

    fn is_rest(&self, label: &Label) -> bool {
        self.config.rest_labels.iter().any(|l| l == label.as_str())
    }

    /// Decide the actuations for one event. Deterministic given the event
    /// and the state left by previous calls.
    pub fn decide(&mut self, event: &Event) -> Vec<ActuationRequest> {
        let key = (event.source_id.clone(), event.feature_type);

        if self.is_rest(&event.label) {
            self.states.remove(&key);
            return Vec::new();
        }
        if self.actuators.is_empty() {
            return Vec::new();
        }

        let state = self.states.entry(key).or_default();
        if state.last_label.as_ref() != Some(&event.label) {
            state.last_label = Some(event.label.clone());
            state.rotation_index = 0;
            state.uses = 0;
        }

        let history = state.labels.entry(event.label.clone()).or_default();
        if let Some(last) = history.last_triggered {
            if event.timestamp - last < self.cooldown {
                return Vec::new();
            }
        }
        history.last_triggered = Some(event.timestamp);

        let horizon = event.timestamp - self.escalation_window;
        history.recent.push_back(event.timestamp);
        while history.recent.front().is_some_and(|t| *t < horizon) {
            history.recent.pop_front();
        }
        let escalate = history.recent.len() >= self.config.escalation_count.max(1);
        if escalate {
            history.recent.clear();
        }

        let mut level = Intensity::for_label(&event.label);
        let action_type;
        let targets: Vec<&(ActuatorId, ActuatorKind)>;
        if escalate {
            level = level.raised();
            action_type = ActionType::Escalated;
            targets = self.actuators.iter().collect();
        } else {
            let count = self.actuators.len();
            targets = vec![&self.actuators[state.rotation_index % count]];
            state.uses += 1;
            if state.uses >= self.config.rotation_uses.max(1) {
                state.uses = 0;
                state.rotation_index = (state.rotation_index + 1) % count;
            }
            action_type = ActionType::Feedback;
        }

        targets
            .into_iter()
            .map(|(id, kind)| ActuationRequest {
                actuator_id: id.clone(),
                action_type,
                params: params_for(*kind, event.feature_type, &event.label, level),
            })
            .collect()
    }

    /// Forget all per-key state.
    pub fn reset(&mut self) {
        self.states.clear();
    }
}

fn to_chrono(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}
