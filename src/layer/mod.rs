//! Source layers and their front-end boundary
//!
//! A [`Layer`] is the composition-side record of one piece of app content. Its
//! front end ([`LayerFe`]) is owned elsewhere; the layer only keeps a weak
//! reference and a snapshot of front-end state ([`LayerFeState`]) that is
//! latched at well defined points of each frame:
//!
//! - [`StateSubset::BasicGeometry`] once per frame before visibility is
//!   computed, shared across all outputs showing the layer
//! - [`StateSubset::GeometryAndContent`] for visible layers on frames where
//!   geometry changed
//! - [`StateSubset::Content`] for visible layers otherwise

use crate::color::Dataspace;
use crate::fence::Fence;
use crate::geometry::{Rect, Region, Transform};
use crate::hwc::Composition;
use crate::render::{GraphicBuffer, LayerSettings};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

static NEXT_LAYER_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of a source layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub u64);

impl fmt::Display for LayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "layer#{}", self.0)
    }
}

/// Layers whose basic geometry was already latched this frame
pub type LayerFeSet = HashSet<LayerId>;

/// Which part of the front-end state to latch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateSubset {
    BasicGeometry,
    GeometryAndContent,
    Content,
}

/// Snapshot of front-end state used by composition
#[derive(Debug, Clone, PartialEq)]
pub struct LayerFeState {
    // Basic geometry
    pub is_visible: bool,
    pub is_opaque: bool,
    /// `None` keeps the layer off every output
    pub layer_stack_id: Option<u32>,
    pub internal_only: bool,
    /// Maps layer bounds into layer stack space
    pub geom_layer_transform: Transform,
    pub geom_layer_bounds: Rect,
    /// Area the app promises is fully transparent, in layer space
    pub transparent_region_hint: Region,
    pub content_dirty: bool,

    // Geometry and content
    pub composition_type: Composition,
    pub force_client_composition: bool,
    pub dataspace: Dataspace,
    pub has_protected_content: bool,
    pub alpha: f32,
    pub buffer: Option<GraphicBuffer>,
    pub solid_color: [f32; 3],
}

impl Default for LayerFeState {
    fn default() -> Self {
        Self {
            is_visible: false,
            is_opaque: false,
            layer_stack_id: None,
            internal_only: false,
            geom_layer_transform: Transform::identity(),
            geom_layer_bounds: Rect::EMPTY,
            transparent_region_hint: Region::new(),
            content_dirty: false,
            composition_type: Composition::Device,
            force_client_composition: false,
            dataspace: Dataspace::Unknown,
            has_protected_content: false,
            alpha: 1.0,
            buffer: None,
            solid_color: [0.0, 0.0, 0.0],
        }
    }
}

/// Settings handed to a front end when it is drawn by the GPU
#[derive(Debug)]
pub struct ClientCompositionTargetSettings<'a> {
    /// Part of the layer to draw, in layer stack space
    pub clip: Region,
    pub use_identity_transform: bool,
    pub needs_filtering: bool,
    pub is_secure: bool,
    pub supports_protected_content: bool,
    /// Area the layer wants cleared instead of drawn
    pub clear_region: &'a mut Region,
}

/// Front end of a layer, owned outside of composition
pub trait LayerFe: Send + Sync {
    /// Copies `subset` of the front-end state into `state`
    fn latch_composition_state(&self, state: &mut LayerFeState, subset: StateSubset);

    /// Produces a draw request, or `None` if there is nothing to draw
    fn prepare_client_composition(
        &self,
        settings: &mut ClientCompositionTargetSettings<'_>,
    ) -> Option<LayerSettings>;

    /// Called once the frame showing this layer was presented
    fn on_layer_displayed(&self, release_fence: Fence);

    fn debug_name(&self) -> String;
}

/// Composition-side record of a source layer
pub struct Layer {
    id: LayerId,
    fe: Weak<dyn LayerFe>,
    fe_state: RwLock<LayerFeState>,
}

impl Layer {
    pub fn new(fe: &Arc<dyn LayerFe>) -> Arc<Layer> {
        Arc::new(Layer {
            id: LayerId(NEXT_LAYER_ID.fetch_add(1, Ordering::Relaxed)),
            fe: Arc::downgrade(fe),
            fe_state: RwLock::new(LayerFeState::default()),
        })
    }

    pub fn id(&self) -> LayerId {
        self.id
    }

    /// The front end, if it is still alive
    pub fn layer_fe(&self) -> Option<Arc<dyn LayerFe>> {
        self.fe.upgrade()
    }

    pub fn fe_state(&self) -> RwLockReadGuard<'_, LayerFeState> {
        self.fe_state.read()
    }

    pub fn edit_fe_state(&self) -> RwLockWriteGuard<'_, LayerFeState> {
        self.fe_state.write()
    }

    /// Latches `subset` of the front-end state; false if the front end is gone
    pub fn latch(&self, subset: StateSubset) -> bool {
        match self.layer_fe() {
            Some(fe) => {
                fe.latch_composition_state(&mut self.fe_state.write(), subset);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer")
            .field("id", &self.id)
            .field("fe_alive", &(self.fe.strong_count() > 0))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct CountingFe {
        latches: Mutex<Vec<StateSubset>>,
    }

    impl LayerFe for CountingFe {
        fn latch_composition_state(&self, state: &mut LayerFeState, subset: StateSubset) {
            self.latches.lock().push(subset);
            state.is_visible = true;
        }

        fn prepare_client_composition(
            &self,
            _settings: &mut ClientCompositionTargetSettings<'_>,
        ) -> Option<LayerSettings> {
            None
        }

        fn on_layer_displayed(&self, _release_fence: Fence) {}

        fn debug_name(&self) -> String {
            "counting".to_string()
        }
    }

    #[test]
    fn test_latch_updates_snapshot() {
        let fe: Arc<dyn LayerFe> = Arc::new(CountingFe {
            latches: Mutex::new(Vec::new()),
        });
        let layer = Layer::new(&fe);

        assert!(!layer.fe_state().is_visible);
        assert!(layer.latch(StateSubset::BasicGeometry));
        assert!(layer.fe_state().is_visible);
    }

    #[test]
    fn test_latch_after_front_end_dropped() {
        let fe: Arc<dyn LayerFe> = Arc::new(CountingFe {
            latches: Mutex::new(Vec::new()),
        });
        let layer = Layer::new(&fe);
        drop(fe);

        assert!(layer.layer_fe().is_none());
        assert!(!layer.latch(StateSubset::Content));
    }

    #[test]
    fn test_layer_ids_are_unique() {
        let fe: Arc<dyn LayerFe> = Arc::new(CountingFe {
            latches: Mutex::new(Vec::new()),
        });
        let a = Layer::new(&fe);
        let b = Layer::new(&fe);
        assert_ne!(a.id(), b.id());
    }
}
