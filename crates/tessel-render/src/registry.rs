//! Process-wide set of named render sessions.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::render::Render;

pub type RenderHandle = Arc<Mutex<Render>>;

/// Named render sessions. Scenes rendered for compositing or the
/// sequencer get their own entry next to the main render.
#[derive(Default)]
pub struct RenderRegistry {
    renders: Mutex<Vec<(String, RenderHandle)>>,
}

impl RenderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The render called `name`, created on first use.
    pub fn new_render(&self, name: &str) -> RenderHandle {
        let mut renders = self.renders.lock();
        if let Some((_, handle)) = renders.iter().find(|(n, _)| n == name) {
            return Arc::clone(handle);
        }
        let mut re = Render::new(name);
        re.init_callbacks();
        let handle = Arc::new(Mutex::new(re));
        renders.push((name.to_string(), Arc::clone(&handle)));
        tracing::debug!("created render session {}", name);
        handle
    }

    pub fn get(&self, name: &str) -> Option<RenderHandle> {
        self.renders
            .lock()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, h)| Arc::clone(h))
    }

    /// Remove a render; its memory is released once the last handle drops.
    pub fn free_render(&self, name: &str) -> bool {
        let mut renders = self.renders.lock();
        let before = renders.len();
        renders.retain(|(n, _)| n != name);
        renders.len() != before
    }

    pub fn free_all(&self) {
        self.renders.lock().clear();
    }

    /// Drop the results of every render but keep the sessions.
    pub fn free_all_results(&self) {
        for (_, handle) in self.renders.lock().iter() {
            handle.lock().free_result();
        }
    }

    /// Release engines kept alive between renders, skipping renders that are
    /// running right now.
    pub fn free_persistent_data(&self) {
        for (name, handle) in self.renders.lock().iter() {
            let Some(mut re) = handle.try_lock() else {
                tracing::debug!("render {} busy, keeping its engine", name);
                continue;
            };
            re.free_engine();
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.renders.lock().iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.renders.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.renders.lock().is_empty()
    }
}
