// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// It includes: vertex input, shaders, rasterization, blending.
// Viewport, scissor and primitive topology are dynamic, so the only thing
// tying a pipeline to a swapchain is the render pass format.

use ash::vk;
use std::ffi::CStr;
use std::sync::Arc;

use super::error::RenderResult;
use super::shader::{ShaderModule, ShaderSet};
use super::{Swapchain, VulkanDevice};
use crate::scene::Vertex;

const ENTRY_POINT: &CStr = c"main";

/// States set while recording instead of baked into the pipeline
pub const DYNAMIC_STATES: [vk::DynamicState; 3] = [
    vk::DynamicState::VIEWPORT,
    vk::DynamicState::SCISSOR,
    vk::DynamicState::PRIMITIVE_TOPOLOGY,
];

/// Create a render pass with a single color attachment (the swapchain image)
pub fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> RenderResult<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    // The layout transition must wait for the acquire semaphore, which is
    // waited on at COLOR_ATTACHMENT_OUTPUT
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    let render_pass = unsafe { device.device.create_render_pass(&render_pass_info, None) }?;
    Ok(render_pass)
}

/// Create one framebuffer per swapchain image view
fn create_framebuffer(
    device: &VulkanDevice,
    image_view: vk::ImageView,
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> RenderResult<vk::Framebuffer> {
    let attachments = &[image_view];
    let framebuffer_info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(attachments)
        .width(extent.width)
        .height(extent.height)
        .layers(1);

    let framebuffer = unsafe { device.device.create_framebuffer(&framebuffer_info, None) }?;
    Ok(framebuffer)
}

/// Vertex input description for triangle vertices (position + color)
pub fn get_vertex_input_info() -> (
    [vk::VertexInputBindingDescription; 1],
    [vk::VertexInputAttributeDescription; 2],
) {
    // One binding for interleaved position + color data
    let binding = vk::VertexInputBindingDescription::builder()
        .binding(0)
        .stride(std::mem::size_of::<Vertex>() as u32)
        .input_rate(vk::VertexInputRate::VERTEX)
        .build();

    // Position attribute (location 0)
    let position_attr = vk::VertexInputAttributeDescription::builder()
        .binding(0)
        .location(0)
        .format(vk::Format::R32G32B32_SFLOAT)
        .offset(0)
        .build();

    // Color attribute (location 1)
    let color_attr = vk::VertexInputAttributeDescription::builder()
        .binding(0)
        .location(1)
        .format(vk::Format::R32G32B32_SFLOAT)
        .offset(12) // After 3 floats
        .build();

    ([binding], [position_attr, color_attr])
}

/// Viewport covering the whole target, depth 0..1
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Create the pipeline layout, with one uniform set when `set_layout` is given
pub fn create_pipeline_layout(
    device: &VulkanDevice,
    set_layout: Option<vk::DescriptorSetLayout>,
) -> RenderResult<vk::PipelineLayout> {
    let set_layouts: Vec<vk::DescriptorSetLayout> = set_layout.into_iter().collect();
    let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);

    let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }?;
    Ok(layout)
}

/// Create the graphics pipeline for the triangle
pub fn create_graphics_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    shaders: &ShaderSet,
) -> RenderResult<vk::Pipeline> {
    // Modules are only needed until the pipeline exists
    let vert_shader = ShaderModule::new(device, &shaders.vertex)?;
    let frag_shader = ShaderModule::new(device, &shaders.fragment)?;

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_shader.handle)
        .name(ENTRY_POINT)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag_shader.handle)
        .name(ENTRY_POINT)
        .build();

    let shader_stages = &[vert_stage, frag_stage];

    // Vertex input
    let (bindings, attributes) = get_vertex_input_info();
    let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    // Input assembly; the topology here is overridden while recording
    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
        .primitive_restart_enable(false);

    // Counts only, the actual rectangles are dynamic
    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&DYNAMIC_STATES);

    // Rasterization; no culling so the triangle shows from both sides of the orbit
    let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
        .depth_clamp_enable(false)
        .rasterizer_discard_enable(false)
        .polygon_mode(vk::PolygonMode::FILL)
        .line_width(1.0)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .depth_bias_enable(false);

    // Multisampling (disabled)
    let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
        .sample_shading_enable(false)
        .rasterization_samples(vk::SampleCountFlags::TYPE_1);

    // Color blending (no blending, opaque)
    let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
        .color_write_mask(vk::ColorComponentFlags::RGBA)
        .blend_enable(false)
        .build();

    let color_blend_attachments = &[color_blend_attachment];
    let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
        .logic_op_enable(false)
        .attachments(color_blend_attachments);

    let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(shader_stages)
        .vertex_input_state(&vertex_input_info)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterizer)
        .multisample_state(&multisampling)
        .color_blend_state(&color_blending)
        .dynamic_state(&dynamic_state)
        .layout(layout)
        .render_pass(render_pass)
        .subpass(0)
        .build();

    let pipelines = unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
            .map_err(|(_, e)| e)?
    };

    Ok(pipelines[0])
}

/// Everything derived from one swapchain: render pass, framebuffers, pipeline.
///
/// Dropped and rebuilt together with the swapchain it was made for.
pub struct FramePipeline {
    pub render_pass: vk::RenderPass,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    device: Arc<VulkanDevice>,
}

impl FramePipeline {
    pub fn new(
        device: Arc<VulkanDevice>,
        swapchain: &Swapchain,
        shaders: &ShaderSet,
        set_layout: Option<vk::DescriptorSetLayout>,
    ) -> RenderResult<Self> {
        // Filled step by step so a failure halfway destroys what was made
        let mut frame = Self {
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::with_capacity(swapchain.image_count()),
            layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            device,
        };

        frame.render_pass = create_render_pass(&frame.device, swapchain.format)?;
        for &view in &swapchain.image_views {
            let framebuffer = create_framebuffer(&frame.device, view, frame.render_pass, swapchain.extent)?;
            frame.framebuffers.push(framebuffer);
        }
        frame.layout = create_pipeline_layout(&frame.device, set_layout)?;
        frame.pipeline = create_graphics_pipeline(&frame.device, frame.render_pass, frame.layout, shaders)?;

        log::debug!(
            "Created pipeline with {} framebuffers at {}x{}",
            frame.framebuffers.len(),
            swapchain.extent.width,
            swapchain.extent.height
        );
        Ok(frame)
    }

    /// Swap in a pipeline built from new shaders; the old one is destroyed.
    ///
    /// The caller guarantees the old pipeline is no longer in use.
    pub fn rebuild_pipeline(&mut self, shaders: &ShaderSet) -> RenderResult<()> {
        let pipeline = create_graphics_pipeline(&self.device, self.render_pass, self.layout, shaders)?;
        let old = std::mem::replace(&mut self.pipeline, pipeline);
        unsafe { self.device.device.destroy_pipeline(old, None) };
        Ok(())
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        unsafe {
            self.device.device.destroy_pipeline(self.pipeline, None);
            self.device.device.destroy_pipeline_layout(self.layout, None);
            for &framebuffer in &self.framebuffers {
                self.device.device.destroy_framebuffer(framebuffer, None);
            }
            self.device.device.destroy_render_pass(self.render_pass, None);
        }
    }
}
