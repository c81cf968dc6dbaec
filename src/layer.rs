//! Layers driven by the host frame loop.

use crate::error::GraphicsResult;

/// A unit of per-frame application logic.
///
/// Every frame the [`LayerStack`] calls `on_update` on all layers, then
/// `on_render`, then `on_ui_render`. Render graphs are executed from
/// `on_render`.
pub trait Layer {
    /// Name used in log messages.
    fn name(&self) -> &str {
        "layer"
    }

    /// Called every frame before rendering. `dt` is in seconds.
    fn on_update(&mut self, _dt: f32) {}

    /// Called every frame to record and submit GPU work.
    fn on_render(&mut self, _dt: f32) -> GraphicsResult<()> {
        Ok(())
    }

    /// Called every frame after all layers have rendered.
    fn on_ui_render(&mut self, _dt: f32) {}
}

/// Ordered collection of layers.
#[derive(Default)]
pub struct LayerStack {
    layers: Vec<Box<dyn Layer>>,
}

impl LayerStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer. Layers run in push order.
    pub fn push_layer(&mut self, layer: impl Layer + 'static) {
        log::debug!("Pushed layer '{}'", layer.name());
        self.layers.push(Box::new(layer));
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Run one frame.
    ///
    /// A failing `on_render` drops that layer's frame only: the error is
    /// logged, the remaining layers still run, and the first error is
    /// returned once the frame is complete.
    pub fn run_frame(&mut self, dt: f32) -> GraphicsResult<()> {
        for layer in &mut self.layers {
            layer.on_update(dt);
        }

        let mut first_error = None;
        for layer in &mut self.layers {
            if let Err(e) = layer.on_render(dt) {
                log::error!("Layer '{}' failed to render: {}", layer.name(), e);
                first_error.get_or_insert(e);
            }
        }

        for layer in &mut self.layers {
            layer.on_ui_render(dt);
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for LayerStack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.layers.iter().map(|layer| layer.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GraphicsError;
    use parking_lot::Mutex;
    use std::sync::Arc;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Layer for Recorder {
        fn name(&self) -> &str {
            self.name
        }

        fn on_update(&mut self, _dt: f32) {
            self.log.lock().push(format!("{}:update", self.name));
        }

        fn on_render(&mut self, _dt: f32) -> GraphicsResult<()> {
            self.log.lock().push(format!("{}:render", self.name));
            if self.fail {
                return Err(GraphicsError::DeviceLost);
            }
            Ok(())
        }

        fn on_ui_render(&mut self, _dt: f32) {
            self.log.lock().push(format!("{}:ui", self.name));
        }
    }

    fn stack(fail_first: bool) -> (LayerStack, Arc<Mutex<Vec<String>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut stack = LayerStack::new();
        for (name, fail) in [("a", fail_first), ("b", false)] {
            stack.push_layer(Recorder {
                name,
                log: Arc::clone(&log),
                fail,
            });
        }
        (stack, log)
    }

    #[test]
    fn test_phase_order() {
        let (mut stack, log) = stack(false);
        stack.run_frame(0.016).unwrap();
        assert_eq!(
            *log.lock(),
            ["a:update", "b:update", "a:render", "b:render", "a:ui", "b:ui"]
        );
    }

    #[test]
    fn test_render_failure_does_not_stop_frame() {
        let (mut stack, log) = stack(true);
        assert_eq!(stack.run_frame(0.016), Err(GraphicsError::DeviceLost));
        assert_eq!(log.lock().len(), 6);
    }
}
