use super::{ComponentState, WildcamOrchestrator};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

pub(super) type ComponentStates = Arc<Mutex<HashMap<String, ComponentState>>>;

pub(super) async fn record_state(states: &ComponentStates, component: &str, state: ComponentState) {
    let mut states = states.lock().await;
    debug!("Component '{}' state changed to: {:?}", component, state);
    states.insert(component.to_string(), state);
}

impl WildcamOrchestrator {
    /// Update component state
    pub async fn set_component_state(&self, component: &str, state: ComponentState) {
        record_state(&self.component_states, component, state).await;
    }

    pub async fn get_component_state(&self, component: &str) -> Option<ComponentState> {
        let states = self.component_states.lock().await;
        states.get(component).cloned()
    }

    pub async fn get_all_component_states(&self) -> HashMap<String, ComponentState> {
        let states = self.component_states.lock().await;
        states.clone()
    }
}
