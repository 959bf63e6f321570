//! Presentation surface boundary
//!
//! A render surface is the buffer queue an output draws its client target
//! into. The output brackets each frame with `begin_frame`/`prepare_frame`,
//! dequeues a buffer only when client composition is needed, queues it back
//! with the draw fence and flips after presenting.

use crate::color::Dataspace;
use crate::fence::Fence;
use crate::geometry::Size;
use crate::render::GraphicBuffer;

pub trait RenderSurface: Send {
    fn is_valid(&self) -> bool;

    fn size(&self) -> Size;

    /// Resizes the buffers backing the surface
    fn set_display_size(&mut self, size: Size);

    fn set_buffer_dataspace(&mut self, dataspace: Dataspace);

    fn is_protected(&self) -> bool;

    fn set_protected(&mut self, protected: bool);

    /// Starts a frame; `must_recompose` is false when the output skips it
    fn begin_frame(&mut self, must_recompose: bool);

    fn prepare_frame(&mut self, uses_client_composition: bool, uses_device_composition: bool);

    /// Acquires the next buffer to draw into, with its release fence
    fn dequeue_buffer(&mut self) -> Option<(GraphicBuffer, Fence)>;

    /// Hands back the current buffer; `ready_fence` signals when drawing ends
    fn queue_buffer(&mut self, ready_fence: Fence);

    /// Fence the device waits on before reading the client target
    fn client_target_acquire_fence(&self) -> Fence;

    fn on_present_display_completed(&mut self);

    fn flip(&mut self);

    fn page_flip_count(&self) -> u32;
}
