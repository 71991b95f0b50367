// Per-frame renderer
//
// Owns everything between "the device exists" and "a frame is on screen":
// the swapchain and its pipeline, the rotating frame slots, the vertex and
// uniform buffers. `draw_frame` is the only place that submits to a queue.
//
// FRAME FLOW:
// 1. Recreate the swapchain if a previous frame flagged it
// 2. Wait for this slot's fence (its last submission is done)
// 3. Acquire a swapchain image (out-of-date aborts the frame)
// 4. Wait for whichever slot last rendered into that image
// 5. Record, reset the fence, submit
// 6. Present (suboptimal/out-of-date flags recreation for next frame)
// 7. Advance to the next slot

use ash::vk;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use super::buffer::GpuBuffer;
use super::error::{RenderError, RenderResult};
use super::pipeline::{full_scissor, full_viewport, FramePipeline};
use super::shader::{ShaderSet, ShaderWatcher};
use super::surface::{Surface, SurfaceProvider};
use super::sync::{FrameScheduler, FrameSlot};
use super::{Swapchain, VulkanDevice};
use crate::scene::{DrawTopology, FrameUniforms, SceneKind, POINT_SIZE, TRIANGLE_VERTICES};

/// Renderer knobs, resolved from the config file
#[derive(Debug, Clone)]
pub struct RendererSettings {
    pub present_mode: vk::PresentModeKHR,
    pub clear_color: [f32; 4],
    pub frames_in_flight: usize,
    pub scene: SceneKind,
    pub topology: DrawTopology,
    pub shader_dir: PathBuf,
    pub hot_reload: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// A frame was submitted and queued for presentation
    Presented,
    /// The swapchain went stale before anything was submitted; try again
    Skipped,
    /// Window has no drawable area; nothing happens until it gets one back
    Deferred,
}

/// What the start of a frame has to do before it can render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStart {
    Render,
    Recreate,
    Defer,
}

/// How the presentation engine judged the swapchain on acquire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainHealth {
    Optimal,
    /// Still usable for this frame
    Suboptimal,
    OutOfDate,
}

/// When the swapchain generation has to be rebuilt.
///
/// Stale signals (resize, suboptimal, out-of-date) only mark it; the rebuild
/// itself happens at the start of the next frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapchainLifecycle {
    stale: bool,
    built: bool,
}

impl SwapchainLifecycle {
    pub fn new() -> Self {
        Self {
            stale: true,
            built: false,
        }
    }

    pub fn needs_recreate(&self) -> bool {
        self.stale || !self.built
    }

    pub fn mark_stale(&mut self) {
        self.stale = true;
    }

    /// A minimized window defers the frame even when the chain is fine
    pub fn frame_start(&self, minimized: bool) -> FrameStart {
        if minimized {
            FrameStart::Defer
        } else if self.needs_recreate() {
            FrameStart::Recreate
        } else {
            FrameStart::Render
        }
    }

    /// Old generation destroyed; nothing to render into until rebuilt
    pub fn torn_down(&mut self) {
        self.built = false;
        self.stale = true;
    }

    pub fn rebuilt(&mut self) {
        self.built = true;
        self.stale = false;
    }

    /// Returns false when the frame must be abandoned before submit
    pub fn after_acquire(&mut self, health: ChainHealth) -> bool {
        match health {
            ChainHealth::Optimal => true,
            ChainHealth::Suboptimal => {
                self.stale = true;
                true
            }
            ChainHealth::OutOfDate => {
                self.stale = true;
                false
            }
        }
    }

    pub fn after_present(&mut self, stale: bool) {
        if stale {
            self.stale = true;
        }
    }
}

impl Default for SwapchainLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

/// Command pool with buffer reset enabled, destroyed on drop
struct CommandPool {
    handle: vk::CommandPool,
    device: Arc<VulkanDevice>,
}

impl CommandPool {
    fn new(device: Arc<VulkanDevice>) -> RenderResult<Self> {
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_families.graphics)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let handle = unsafe { device.device.create_command_pool(&pool_info, None) }?;
        Ok(Self { handle, device })
    }

    fn allocate(&self, count: usize) -> RenderResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(self.handle)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count as u32);

        let buffers = unsafe { self.device.device.allocate_command_buffers(&alloc_info) }?;
        Ok(buffers)
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        // Frees every command buffer allocated from it
        unsafe { self.device.device.destroy_command_pool(self.handle, None) };
    }
}

/// Per-slot uniform buffers and the descriptor sets pointing at them
struct UniformBindings {
    set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    sets: Vec<vk::DescriptorSet>,
    buffers: Vec<GpuBuffer>,
    device: Arc<VulkanDevice>,
}

impl UniformBindings {
    fn new(device: Arc<VulkanDevice>, slot_count: usize) -> RenderResult<Self> {
        let mut bindings = Self {
            set_layout: vk::DescriptorSetLayout::null(),
            pool: vk::DescriptorPool::null(),
            sets: Vec::new(),
            buffers: Vec::with_capacity(slot_count),
            device,
        };

        let layout_binding = vk::DescriptorSetLayoutBinding::builder()
            .binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .stage_flags(vk::ShaderStageFlags::VERTEX)
            .build();
        let layout_bindings = [layout_binding];
        let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&layout_bindings);
        bindings.set_layout =
            unsafe { bindings.device.device.create_descriptor_set_layout(&layout_info, None) }?;

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count: slot_count as u32,
        }];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(slot_count as u32);
        bindings.pool = unsafe { bindings.device.device.create_descriptor_pool(&pool_info, None) }?;

        let set_layouts = vec![bindings.set_layout; slot_count];
        let alloc_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(bindings.pool)
            .set_layouts(&set_layouts);
        bindings.sets = unsafe { bindings.device.device.allocate_descriptor_sets(&alloc_info) }?;

        let size = std::mem::size_of::<FrameUniforms>() as vk::DeviceSize;
        for slot in 0..slot_count {
            let buffer = GpuBuffer::new(
                bindings.device.clone(),
                &format!("frame uniforms {slot}"),
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            )?;

            let buffer_info = [vk::DescriptorBufferInfo {
                buffer: buffer.buffer,
                offset: 0,
                range: size,
            }];
            let write = vk::WriteDescriptorSet::builder()
                .dst_set(bindings.sets[slot])
                .dst_binding(0)
                .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                .buffer_info(&buffer_info)
                .build();
            unsafe { bindings.device.device.update_descriptor_sets(&[write], &[]) };

            bindings.buffers.push(buffer);
        }

        log::debug!("Created {} uniform buffers of {} bytes", slot_count, size);
        Ok(bindings)
    }
}

impl Drop for UniformBindings {
    fn drop(&mut self) {
        // Sets are freed with the pool
        unsafe {
            self.device.device.destroy_descriptor_pool(self.pool, None);
            self.device.device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// Drives the frame loop against one window surface.
///
/// IMPORTANT: Field order matters for Drop! Swapchain-derived objects go
/// first, the surface and device last.
pub struct Renderer {
    // ─────────────────────────────────────────────────────────────────────────
    // SWAPCHAIN GENERATION (rebuilt on resize)
    // ─────────────────────────────────────────────────────────────────────────
    frame_pipeline: Option<FramePipeline>,
    swapchain: Option<Swapchain>,

    // ─────────────────────────────────────────────────────────────────────────
    // FRAMES IN FLIGHT
    // ─────────────────────────────────────────────────────────────────────────
    slots: Vec<FrameSlot>,
    scheduler: FrameScheduler,
    uniforms: Option<UniformBindings>,
    vertex_buffer: GpuBuffer,
    _command_pool: CommandPool,

    // ─────────────────────────────────────────────────────────────────────────
    // SHADERS
    // ─────────────────────────────────────────────────────────────────────────
    shaders: ShaderSet,
    shader_watcher: Option<ShaderWatcher>,

    // ─────────────────────────────────────────────────────────────────────────
    // STATE
    // ─────────────────────────────────────────────────────────────────────────
    settings: RendererSettings,
    topology: DrawTopology,
    lifecycle: SwapchainLifecycle,
    start_time: Instant,

    surface: Surface,
    device: Arc<VulkanDevice>,
}

impl Renderer {
    /// Build every long-lived resource and, unless the window is minimized,
    /// the first swapchain.
    pub fn new(
        device: Arc<VulkanDevice>,
        surface: Surface,
        window: &impl SurfaceProvider,
        settings: RendererSettings,
    ) -> RenderResult<Self> {
        let shaders = ShaderSet::load(&settings.shader_dir, settings.scene.shader_stem())?;

        let slot_count = settings.frames_in_flight.max(1);
        let command_pool = CommandPool::new(device.clone())?;
        let slots = command_pool
            .allocate(slot_count)?
            .into_iter()
            .map(|command_buffer| FrameSlot::new(device.clone(), command_buffer))
            .collect::<RenderResult<Vec<_>>>()?;

        let vertex_buffer = GpuBuffer::with_data(
            device.clone(),
            "triangle vertices",
            vk::BufferUsageFlags::VERTEX_BUFFER,
            &TRIANGLE_VERTICES,
        )?;

        let uniforms = if settings.scene.uses_uniforms() {
            Some(UniformBindings::new(device.clone(), slot_count)?)
        } else {
            None
        };

        let shader_watcher = if settings.hot_reload {
            match ShaderWatcher::new(&settings.shader_dir) {
                Ok(watcher) => Some(watcher),
                Err(e) => {
                    log::warn!("Shader hot reload disabled: {}", e);
                    None
                }
            }
        } else {
            None
        };

        log::info!(
            "Renderer ready: scene {:?}, {} frames in flight, {:?}",
            settings.scene,
            slots.len(),
            settings.topology
        );

        let mut renderer = Self {
            frame_pipeline: None,
            swapchain: None,
            slots,
            scheduler: FrameScheduler::new(slot_count, 0),
            uniforms,
            vertex_buffer,
            _command_pool: command_pool,
            shaders,
            shader_watcher,
            topology: settings.topology,
            settings,
            lifecycle: SwapchainLifecycle::new(),
            start_time: Instant::now(),
            surface,
            device,
        };

        renderer.recreate_swapchain(window)?;
        Ok(renderer)
    }

    /// Mark the swapchain stale; rebuilt at the start of the next frame
    pub fn request_resize(&mut self) {
        self.lifecycle.mark_stale();
    }

    pub fn toggle_topology(&mut self) -> DrawTopology {
        self.topology = self.topology.toggled();
        log::info!("Draw topology: {:?}", self.topology);
        if self.topology == DrawTopology::PointList && !self.device.supports_point_size(POINT_SIZE) {
            log::warn!("Point size {} outside device range, points will be clamped", POINT_SIZE);
        }
        self.topology
    }

    // =========================================================================
    // SWAPCHAIN RECREATION
    // =========================================================================

    /// Tear down the swapchain generation and build a new one at the current
    /// drawable size.
    ///
    /// Returns false, leaving the recreate flag set, while the window has no
    /// drawable area. Calling it twice in a row yields an equivalent chain.
    pub fn recreate_swapchain(&mut self, window: &impl SurfaceProvider) -> RenderResult<bool> {
        if window.is_minimized() {
            self.lifecycle.mark_stale();
            return Ok(false);
        }

        // Nothing may still reference the old images
        self.device.wait_idle()?;

        // Old generation goes before the new one is made
        self.frame_pipeline = None;
        self.swapchain = None;
        self.lifecycle.torn_down();

        let swapchain = match Swapchain::new(
            self.device.clone(),
            &self.surface,
            window.drawable_size(),
            self.settings.present_mode,
        ) {
            Ok(swapchain) => swapchain,
            Err(e) if e.is_out_of_date() => {
                log::debug!("Surface has no drawable area yet, deferring swapchain");
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let set_layout = self.uniforms.as_ref().map(|uniforms| uniforms.set_layout);
        let frame_pipeline = FramePipeline::new(self.device.clone(), &swapchain, &self.shaders, set_layout)?;

        // Device is idle: every slot is done and no image has an owner
        self.scheduler.reset_after_idle(swapchain.image_count());

        log::info!(
            "Swapchain ready: {}x{}, {} images, {:?}/{:?}, {:?}",
            swapchain.extent.width,
            swapchain.extent.height,
            swapchain.image_count(),
            swapchain.format,
            swapchain.color_space,
            swapchain.present_mode
        );

        self.swapchain = Some(swapchain);
        self.frame_pipeline = Some(frame_pipeline);
        self.lifecycle.rebuilt();
        Ok(true)
    }

    // =========================================================================
    // SHADER HOT RELOAD
    // =========================================================================

    /// Rebuild the pipeline if a watched shader changed on disk.
    ///
    /// A shader that fails to load or compile leaves the old pipeline in place.
    fn reload_shaders_if_changed(&mut self) -> RenderResult<()> {
        let changed = self
            .shader_watcher
            .as_ref()
            .map_or(false, |watcher| watcher.poll_changed(&self.shaders));
        if !changed {
            return Ok(());
        }

        let shaders = match self.shaders.reload() {
            Ok(shaders) => shaders,
            Err(e) => {
                log::warn!("Shader reload failed, keeping previous pipeline: {}", e);
                return Ok(());
            }
        };

        if let Some(frame_pipeline) = self.frame_pipeline.as_mut() {
            // The pipeline being replaced may still be in use
            self.device.wait_idle()?;
            if let Err(e) = frame_pipeline.rebuild_pipeline(&shaders) {
                log::warn!("Pipeline rebuild failed, keeping previous pipeline: {}", e);
                return Ok(());
            }
        }

        log::info!("Shaders reloaded");
        self.shaders = shaders;
        Ok(())
    }

    // =========================================================================
    // FRAME
    // =========================================================================

    /// Render and present one frame.
    ///
    /// Swapchain staleness never surfaces as an error; anything else returned
    /// here is fatal.
    pub fn draw_frame(&mut self, window: &impl SurfaceProvider) -> RenderResult<FrameStatus> {
        self.reload_shaders_if_changed()?;

        match self.lifecycle.frame_start(window.is_minimized()) {
            FrameStart::Defer => return Ok(FrameStatus::Deferred),
            FrameStart::Recreate => {
                if !self.recreate_swapchain(window)? {
                    return Ok(FrameStatus::Deferred);
                }
            }
            FrameStart::Render => {}
        }

        let slot_index = self.scheduler.current();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 1: Wait until this slot's previous submission is done
        // ─────────────────────────────────────────────────────────────────────
        self.slots[slot_index].wait()?;
        self.scheduler.begin_acquire();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 2: Acquire next swapchain image
        // ─────────────────────────────────────────────────────────────────────
        let swapchain = self.swapchain.as_ref().ok_or(RenderError::SwapchainOutOfDate)?;
        let acquired = swapchain.acquire_next_image(u64::MAX, self.slots[slot_index].image_available);

        let (image_index, health) = match acquired {
            Ok((index, false)) => (index, ChainHealth::Optimal),
            Ok((index, true)) => (index, ChainHealth::Suboptimal),
            Err(e) if e.is_out_of_date() => (0, ChainHealth::OutOfDate),
            Err(e) => return Err(e),
        };
        if !self.lifecycle.after_acquire(health) {
            log::warn!("Swapchain out of date on acquire, recreating");
            // Fence untouched, so the slot stays signaled for the retry
            self.scheduler.abort_frame();
            return Ok(FrameStatus::Skipped);
        }
        let extent = swapchain.extent;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 3: Make sure no other slot is still rendering into this image
        // ─────────────────────────────────────────────────────────────────────
        if let Some(owner) = self.scheduler.claim_image(image_index as usize) {
            self.slots[owner].wait()?;
            self.scheduler.retire(owner);
        }

        // ─────────────────────────────────────────────────────────────────────
        // STEP 4: Record commands and per-frame data
        // ─────────────────────────────────────────────────────────────────────
        if let Some(uniforms) = self.uniforms.as_mut() {
            let data = FrameUniforms::at(self.start_time.elapsed().as_secs_f32(), extent);
            uniforms.buffers[slot_index].write(std::slice::from_ref(&data))?;
        }

        self.scheduler.begin_recording();
        self.record_commands(slot_index, image_index as usize, extent)?;

        // ─────────────────────────────────────────────────────────────────────
        // STEP 5: Submit
        // ─────────────────────────────────────────────────────────────────────
        let slot = &self.slots[slot_index];
        let wait_semaphores = [slot.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.render_finished];
        let command_buffers = [slot.command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores) // Wait for image to be available
            .wait_dst_stage_mask(&wait_stages) // Which stage waits
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores); // Signal when done

        // Only now is the fence guaranteed to be signaled again by this frame
        slot.reset()?;
        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                slot.in_flight_fence,
            )?;
        }
        self.scheduler.submitted();

        // ─────────────────────────────────────────────────────────────────────
        // STEP 6: Present
        // ─────────────────────────────────────────────────────────────────────
        let swapchain = self.swapchain.as_ref().ok_or(RenderError::SwapchainOutOfDate)?;
        let stale = swapchain.present(self.device.present_queue, image_index, &signal_semaphores)?;
        self.scheduler.presenting();
        if stale {
            log::debug!("Swapchain suboptimal or out of date after present");
        }
        self.lifecycle.after_present(stale);

        // ─────────────────────────────────────────────────────────────────────
        // STEP 7: Advance to next slot
        // ─────────────────────────────────────────────────────────────────────
        log::trace!(
            "Slot {} {:?} with {} outstanding",
            slot_index,
            self.scheduler.state(slot_index),
            self.scheduler.outstanding(slot_index)
        );
        self.scheduler.advance();
        Ok(FrameStatus::Presented)
    }

    fn record_commands(&self, slot_index: usize, image_index: usize, extent: vk::Extent2D) -> RenderResult<()> {
        let frame_pipeline = self
            .frame_pipeline
            .as_ref()
            .ok_or(RenderError::SwapchainOutOfDate)?;
        let framebuffer = *frame_pipeline
            .framebuffers
            .get(image_index)
            .ok_or(RenderError::SwapchainOutOfDate)?;

        let device = &self.device.device;
        let cmd = self.slots[slot_index].command_buffer;

        let clear_values = [vk::ClearValue {
            color: vk::ClearColorValue {
                float32: self.settings.clear_color,
            },
        }];

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(frame_pipeline.render_pass)
            .framebuffer(framebuffer)
            .render_area(full_scissor(extent))
            .clear_values(&clear_values);

        let begin_info =
            vk::CommandBufferBeginInfo::builder().flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(cmd, &begin_info)?;

            device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, frame_pipeline.pipeline);
            device.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer.buffer], &[0]);

            if let Some(uniforms) = &self.uniforms {
                device.cmd_bind_descriptor_sets(
                    cmd,
                    vk::PipelineBindPoint::GRAPHICS,
                    frame_pipeline.layout,
                    0,
                    &[uniforms.sets[slot_index]],
                    &[],
                );
            }

            // Dynamic state
            device.cmd_set_viewport(cmd, 0, &[full_viewport(extent)]);
            device.cmd_set_scissor(cmd, 0, &[full_scissor(extent)]);
            self.device
                .dynamic_state
                .cmd_set_primitive_topology(cmd, self.topology.to_vk());

            device.cmd_draw(cmd, TRIANGLE_VERTICES.len() as u32, 1, 0, 0);
            device.cmd_end_render_pass(cmd);

            device.end_command_buffer(cmd)?;
        }

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        log::info!("Cleaning up renderer...");
        // Wait for GPU to finish before destroying anything
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device wait failed during shutdown: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedWindow(u32, u32);

    impl SurfaceProvider for FixedWindow {
        fn drawable_size(&self) -> vk::Extent2D {
            vk::Extent2D {
                width: self.0,
                height: self.1,
            }
        }
    }

    /// Swapchain stand-in: counts generations and remembers its extent
    #[derive(Default)]
    struct FakeChain {
        generation: u32,
        extent: Option<vk::Extent2D>,
        presented: u32,
    }

    impl FakeChain {
        fn rebuild(&mut self, extent: vk::Extent2D) {
            self.generation += 1;
            self.extent = Some(extent);
        }
    }

    /// One pass through the frame flow with the GPU calls faked out
    fn run_frame(
        lifecycle: &mut SwapchainLifecycle,
        chain: &mut FakeChain,
        window: &FixedWindow,
        acquire: ChainHealth,
        present_stale: bool,
    ) -> FrameStatus {
        match lifecycle.frame_start(window.is_minimized()) {
            FrameStart::Defer => return FrameStatus::Deferred,
            FrameStart::Recreate => {
                lifecycle.torn_down();
                chain.rebuild(window.drawable_size());
                lifecycle.rebuilt();
            }
            FrameStart::Render => {}
        }

        // Rendering only ever happens into a live chain of the window's size
        assert_eq!(chain.extent, Some(window.drawable_size()));

        if !lifecycle.after_acquire(acquire) {
            return FrameStatus::Skipped;
        }
        chain.presented += 1;
        lifecycle.after_present(present_stale);
        FrameStatus::Presented
    }

    #[test]
    fn test_first_frame_builds_the_chain() {
        let mut lifecycle = SwapchainLifecycle::new();
        let mut chain = FakeChain::default();
        let window = FixedWindow(800, 600);

        assert!(lifecycle.needs_recreate());
        let status = run_frame(&mut lifecycle, &mut chain, &window, ChainHealth::Optimal, false);
        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(chain.generation, 1);
        assert!(!lifecycle.needs_recreate());
    }

    #[test]
    fn test_back_to_back_recreation_stays_usable() {
        let mut lifecycle = SwapchainLifecycle::new();
        let mut chain = FakeChain::default();
        let window = FixedWindow(800, 600);
        run_frame(&mut lifecycle, &mut chain, &window, ChainHealth::Optimal, false);

        // Two rebuilds with no frame in between
        for _ in 0..2 {
            lifecycle.mark_stale();
            assert_eq!(lifecycle.frame_start(false), FrameStart::Recreate);
            lifecycle.torn_down();
            chain.rebuild(window.drawable_size());
            lifecycle.rebuilt();
            assert_eq!(lifecycle.frame_start(false), FrameStart::Render);
        }
        assert_eq!(chain.generation, 3);

        // Two frames that each start with a rebuild
        for expected_generation in [4, 5] {
            lifecycle.mark_stale();
            let status = run_frame(&mut lifecycle, &mut chain, &window, ChainHealth::Optimal, false);
            assert_eq!(status, FrameStatus::Presented);
            assert_eq!(chain.generation, expected_generation);
        }
        assert_eq!(chain.presented, 3);
    }

    #[test]
    fn test_zero_size_window_defers_then_resumes() {
        let mut lifecycle = SwapchainLifecycle::new();
        let mut chain = FakeChain::default();
        run_frame(&mut lifecycle, &mut chain, &FixedWindow(800, 600), ChainHealth::Optimal, false);

        // Minimize: resize to 0x0 marks the chain stale
        lifecycle.mark_stale();
        let minimized = FixedWindow(0, 0);
        for _ in 0..3 {
            let status = run_frame(&mut lifecycle, &mut chain, &minimized, ChainHealth::Optimal, false);
            assert_eq!(status, FrameStatus::Deferred);
        }
        assert_eq!(chain.generation, 1, "nothing is rebuilt while minimized");
        assert!(lifecycle.needs_recreate());

        // Restore at a new size
        let restored = FixedWindow(1024, 768);
        let status = run_frame(&mut lifecycle, &mut chain, &restored, ChainHealth::Optimal, false);
        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(chain.generation, 2);
        assert_eq!(chain.extent, Some(restored.drawable_size()));
    }

    #[test]
    fn test_torn_down_chain_with_no_area_keeps_deferring() {
        // Surface caps reported a zero extent after the old chain was destroyed
        let mut lifecycle = SwapchainLifecycle::new();
        lifecycle.rebuilt();
        lifecycle.torn_down();
        assert!(lifecycle.needs_recreate());
        assert_eq!(lifecycle.frame_start(false), FrameStart::Recreate);
        assert_eq!(lifecycle.frame_start(true), FrameStart::Defer);
    }

    #[test]
    fn test_suboptimal_present_recreates_next_frame() {
        let mut lifecycle = SwapchainLifecycle::new();
        let mut chain = FakeChain::default();
        let window = FixedWindow(800, 600);
        run_frame(&mut lifecycle, &mut chain, &window, ChainHealth::Optimal, false);

        let status = run_frame(&mut lifecycle, &mut chain, &window, ChainHealth::Optimal, true);
        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(chain.generation, 1, "the stale frame itself is not rebuilt");

        run_frame(&mut lifecycle, &mut chain, &window, ChainHealth::Optimal, false);
        assert_eq!(chain.generation, 2);

        // Settled: no further rebuilds
        run_frame(&mut lifecycle, &mut chain, &window, ChainHealth::Optimal, false);
        assert_eq!(chain.generation, 2);
    }

    #[test]
    fn test_suboptimal_acquire_still_renders() {
        let mut lifecycle = SwapchainLifecycle::new();
        let mut chain = FakeChain::default();
        let window = FixedWindow(800, 600);
        run_frame(&mut lifecycle, &mut chain, &window, ChainHealth::Optimal, false);

        let status = run_frame(&mut lifecycle, &mut chain, &window, ChainHealth::Suboptimal, false);
        assert_eq!(status, FrameStatus::Presented);
        assert!(lifecycle.needs_recreate());
    }

    #[test]
    fn test_out_of_date_acquire_skips_then_rebuilds() {
        let mut lifecycle = SwapchainLifecycle::new();
        let mut chain = FakeChain::default();
        let window = FixedWindow(800, 600);
        run_frame(&mut lifecycle, &mut chain, &window, ChainHealth::Optimal, false);

        let status = run_frame(&mut lifecycle, &mut chain, &window, ChainHealth::OutOfDate, false);
        assert_eq!(status, FrameStatus::Skipped);
        assert_eq!(chain.presented, 1);

        let status = run_frame(&mut lifecycle, &mut chain, &window, ChainHealth::Optimal, false);
        assert_eq!(status, FrameStatus::Presented);
        assert_eq!(chain.generation, 2);
    }

    #[test]
    fn test_platform_minimized_flag_defers_a_healthy_chain() {
        let mut lifecycle = SwapchainLifecycle::new();
        lifecycle.rebuilt();
        assert_eq!(lifecycle.frame_start(true), FrameStart::Defer);
        assert!(!lifecycle.needs_recreate());
        assert_eq!(lifecycle.frame_start(false), FrameStart::Render);
    }
}
