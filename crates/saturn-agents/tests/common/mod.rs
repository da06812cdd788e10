//! A recording graphics device for renderer tests.
//!
//! Every object the renderer creates is tracked until it is destroyed, every
//! command is appended to an event log, and submissions only complete once
//! they are waited on.

#![allow(dead_code)]

use saturn_agents::SceneRenderer;
use saturn_core::math::{Mat4, Vec3};
use saturn_core::renderer::*;
use saturn_core::RendererConfig;
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    ShaderModule,
    PipelineLayout,
    RenderPipeline,
    ComputePipeline,
    BindGroupLayout,
    BindGroup,
    Buffer,
    Texture,
    TextureView,
    Sampler,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Create {
        kind: Kind,
        id: usize,
        label: Option<String>,
    },
    Destroy {
        kind: Kind,
        id: usize,
    },
    WriteBuffer {
        id: usize,
        len: usize,
    },
    Barrier(ResourceBarrier),
    BeginRenderPass(Option<String>),
    BeginComputePass(Option<String>),
    SetBindGroup {
        index: u32,
        group: BindGroupId,
    },
    Draw {
        vertices: Range<u32>,
        instances: Range<u32>,
    },
    DrawIndexed {
        indices: Range<u32>,
        instances: Range<u32>,
    },
    Dispatch(u32, u32, u32),
    Submit(SubmissionIndex),
    Wait(SubmissionIndex),
}

#[derive(Debug, Default)]
pub struct MockState {
    next_id: usize,
    next_command_buffer: u64,
    last_submission: u64,
    completed: u64,
    live: HashMap<Kind, HashSet<usize>>,
    labels: HashMap<(Kind, usize), String>,
    events: Vec<Event>,
    failing_labels: Vec<String>,
    unknown_destroys: usize,
}

/// Shared handle to the recorded state. Clones observe the same device.
#[derive(Debug, Clone, Default)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn as_device(&self) -> Arc<dyn GraphicsDevice> {
        Arc::new(self.clone())
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    /// Makes every creation whose label starts with `prefix` fail.
    pub fn fail_label(&self, prefix: &str) {
        self.state().failing_labels.push(prefix.to_string());
    }

    pub fn clear_failures(&self) {
        self.state().failing_labels.clear();
    }

    pub fn events(&self) -> Vec<Event> {
        self.state().events.clone()
    }

    pub fn clear_events(&self) {
        self.state().events.clear();
    }

    /// Number of live objects of every kind.
    pub fn live_count(&self) -> usize {
        self.state().live.values().map(HashSet::len).sum()
    }

    pub fn live(&self, kind: Kind) -> usize {
        self.state().live.get(&kind).map_or(0, HashSet::len)
    }

    /// Destroy calls on ids that were never created or already destroyed.
    pub fn unknown_destroys(&self) -> usize {
        self.state().unknown_destroys
    }

    pub fn submission_count(&self) -> usize {
        self.state()
            .events
            .iter()
            .filter(|event| matches!(event, Event::Submit(_)))
            .count()
    }

    /// Id of the newest live object of `kind` created with exactly `label`.
    ///
    /// Labels are kept apart from the event log, so clearing the events does
    /// not hide objects that are still alive.
    pub fn find(&self, kind: Kind, label: &str) -> Option<usize> {
        self.state()
            .labels
            .iter()
            .filter(|((k, _), l)| *k == kind && l.as_str() == label)
            .map(|((_, id), _)| *id)
            .max()
    }

    fn create(&self, kind: Kind, label: Option<&str>) -> Result<usize, ResourceError> {
        let mut state = self.state();
        if let Some(label) = label {
            if state.failing_labels.iter().any(|p| label.starts_with(p.as_str())) {
                return Err(ResourceError::OutOfMemory {
                    label: label.to_string(),
                    requested: 0,
                });
            }
        }
        state.next_id += 1;
        let id = state.next_id;
        state.live.entry(kind).or_default().insert(id);
        if let Some(label) = label {
            state.labels.insert((kind, id), label.to_string());
        }
        state.events.push(Event::Create {
            kind,
            id,
            label: label.map(str::to_string),
        });
        Ok(id)
    }

    fn destroy(&self, kind: Kind, id: usize) -> Result<(), ResourceError> {
        let mut state = self.state();
        let removed = state.live.get_mut(&kind).is_some_and(|set| set.remove(&id));
        if !removed {
            state.unknown_destroys += 1;
            return Err(ResourceError::NotFound);
        }
        state.labels.remove(&(kind, id));
        state.events.push(Event::Destroy { kind, id });
        Ok(())
    }

    fn record(&self, event: Event) {
        self.state().events.push(event);
    }
}

impl GraphicsDevice for MockDevice {
    fn create_shader_module(
        &self,
        descriptor: &ShaderModuleDescriptor,
    ) -> Result<ShaderModuleId, ResourceError> {
        self.create(Kind::ShaderModule, descriptor.label.as_deref())
            .map(ShaderModuleId)
    }

    fn destroy_shader_module(&self, id: ShaderModuleId) -> Result<(), ResourceError> {
        self.destroy(Kind::ShaderModule, id.0)
    }

    fn create_pipeline_layout(
        &self,
        descriptor: &PipelineLayoutDescriptor,
    ) -> Result<PipelineLayoutId, ResourceError> {
        self.create(Kind::PipelineLayout, descriptor.label.as_deref())
            .map(PipelineLayoutId)
    }

    fn destroy_pipeline_layout(&self, id: PipelineLayoutId) -> Result<(), ResourceError> {
        self.destroy(Kind::PipelineLayout, id.0)
    }

    fn create_render_pipeline(
        &self,
        descriptor: &RenderPipelineDescriptor,
    ) -> Result<RenderPipelineId, ResourceError> {
        self.create(Kind::RenderPipeline, descriptor.label.as_deref())
            .map(RenderPipelineId)
    }

    fn destroy_render_pipeline(&self, id: RenderPipelineId) -> Result<(), ResourceError> {
        self.destroy(Kind::RenderPipeline, id.0)
    }

    fn create_compute_pipeline(
        &self,
        descriptor: &ComputePipelineDescriptor,
    ) -> Result<ComputePipelineId, ResourceError> {
        self.create(Kind::ComputePipeline, descriptor.label.as_deref())
            .map(ComputePipelineId)
    }

    fn destroy_compute_pipeline(&self, id: ComputePipelineId) -> Result<(), ResourceError> {
        self.destroy(Kind::ComputePipeline, id.0)
    }

    fn create_bind_group_layout(
        &self,
        descriptor: &BindGroupLayoutDescriptor,
    ) -> Result<BindGroupLayoutId, ResourceError> {
        self.create(Kind::BindGroupLayout, descriptor.label.as_deref())
            .map(BindGroupLayoutId)
    }

    fn destroy_bind_group_layout(&self, id: BindGroupLayoutId) -> Result<(), ResourceError> {
        self.destroy(Kind::BindGroupLayout, id.0)
    }

    fn create_bind_group(
        &self,
        descriptor: &BindGroupDescriptor,
    ) -> Result<BindGroupId, ResourceError> {
        self.create(Kind::BindGroup, descriptor.label.as_deref())
            .map(BindGroupId)
    }

    fn destroy_bind_group(&self, id: BindGroupId) -> Result<(), ResourceError> {
        self.destroy(Kind::BindGroup, id.0)
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, ResourceError> {
        self.create(Kind::Buffer, descriptor.label.as_deref())
            .map(BufferId)
    }

    fn create_buffer_with_data(
        &self,
        descriptor: &BufferDescriptor,
        _data: &[u8],
    ) -> Result<BufferId, ResourceError> {
        self.create_buffer(descriptor)
    }

    fn destroy_buffer(&self, id: BufferId) -> Result<(), ResourceError> {
        self.destroy(Kind::Buffer, id.0)
    }

    fn write_buffer(&self, id: BufferId, _offset: u64, data: &[u8]) -> Result<(), ResourceError> {
        let mut state = self.state();
        if !state.live.get(&Kind::Buffer).is_some_and(|set| set.contains(&id.0)) {
            return Err(ResourceError::NotFound);
        }
        state.events.push(Event::WriteBuffer {
            id: id.0,
            len: data.len(),
        });
        Ok(())
    }

    fn create_texture(&self, descriptor: &TextureDescriptor) -> Result<TextureId, ResourceError> {
        self.create(Kind::Texture, descriptor.label.as_deref())
            .map(TextureId)
    }

    fn destroy_texture(&self, id: TextureId) -> Result<(), ResourceError> {
        self.destroy(Kind::Texture, id.0)
    }

    fn create_texture_view(
        &self,
        _texture_id: TextureId,
        descriptor: &TextureViewDescriptor,
    ) -> Result<TextureViewId, ResourceError> {
        self.create(Kind::TextureView, descriptor.label.as_deref())
            .map(TextureViewId)
    }

    fn destroy_texture_view(&self, id: TextureViewId) -> Result<(), ResourceError> {
        self.destroy(Kind::TextureView, id.0)
    }

    fn create_sampler(&self, descriptor: &SamplerDescriptor) -> Result<SamplerId, ResourceError> {
        self.create(Kind::Sampler, descriptor.label.as_deref())
            .map(SamplerId)
    }

    fn destroy_sampler(&self, id: SamplerId) -> Result<(), ResourceError> {
        self.destroy(Kind::Sampler, id.0)
    }

    fn create_command_encoder(&self, _label: Option<&str>) -> Box<dyn CommandEncoder> {
        let id = {
            let mut state = self.state();
            state.next_command_buffer += 1;
            state.next_command_buffer
        };
        Box::new(MockCommandEncoder {
            device: self.clone(),
            id,
        })
    }

    fn submit_command_buffer(&self, _command_buffer: CommandBufferId) -> SubmissionIndex {
        let mut state = self.state();
        state.last_submission += 1;
        let index = SubmissionIndex(state.last_submission);
        state.events.push(Event::Submit(index));
        index
    }

    fn wait_for_submission(&self, index: SubmissionIndex) -> Result<(), RenderError> {
        let mut state = self.state();
        state.completed = state.completed.max(index.0);
        state.events.push(Event::Wait(index));
        Ok(())
    }

    fn is_submission_complete(&self, index: SubmissionIndex) -> bool {
        index.0 <= self.state().completed
    }
}

struct MockCommandEncoder {
    device: MockDevice,
    id: u64,
}

struct MockRenderPass {
    device: MockDevice,
}

struct MockComputePass {
    device: MockDevice,
}

impl RenderPass<'_> for MockRenderPass {
    fn set_pipeline(&mut self, _pipeline: RenderPipelineId) {}

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupId, _offsets: &[u32]) {
        self.device.record(Event::SetBindGroup {
            index,
            group: bind_group,
        });
    }

    fn set_vertex_buffer(&mut self, _slot: u32, _buffer: BufferId, _offset: u64) {}

    fn set_index_buffer(&mut self, _buffer: BufferId, _offset: u64, _index_format: IndexFormat) {}

    fn draw(&mut self, vertices: Range<u32>, instances: Range<u32>) {
        self.device.record(Event::Draw {
            vertices,
            instances,
        });
    }

    fn draw_indexed(&mut self, indices: Range<u32>, _base_vertex: i32, instances: Range<u32>) {
        self.device.record(Event::DrawIndexed { indices, instances });
    }
}

impl ComputePass<'_> for MockComputePass {
    fn set_pipeline(&mut self, _pipeline: ComputePipelineId) {}

    fn set_bind_group(&mut self, index: u32, bind_group: BindGroupId, _offsets: &[u32]) {
        self.device.record(Event::SetBindGroup {
            index,
            group: bind_group,
        });
    }

    fn dispatch_workgroups(&mut self, x: u32, y: u32, z: u32) {
        self.device.record(Event::Dispatch(x, y, z));
    }
}

impl CommandEncoder for MockCommandEncoder {
    fn begin_render_pass<'encoder>(
        &'encoder mut self,
        desc: &RenderPassDescriptor<'encoder>,
    ) -> Box<dyn RenderPass<'encoder> + 'encoder> {
        self.device
            .record(Event::BeginRenderPass(desc.label.map(str::to_string)));
        Box::new(MockRenderPass {
            device: self.device.clone(),
        })
    }

    fn begin_compute_pass<'encoder>(
        &'encoder mut self,
        desc: &ComputePassDescriptor<'encoder>,
    ) -> Box<dyn ComputePass<'encoder> + 'encoder> {
        self.device
            .record(Event::BeginComputePass(desc.label.map(str::to_string)));
        Box::new(MockComputePass {
            device: self.device.clone(),
        })
    }

    fn resource_barrier(&mut self, barriers: &[ResourceBarrier]) {
        for barrier in barriers {
            self.device.record(Event::Barrier(*barrier));
        }
    }

    fn finish(self: Box<Self>) -> CommandBufferId {
        CommandBufferId(self.id)
    }
}

// --- Helpers ---

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub const CUBE: MeshHandle = MeshHandle(1);

/// Registers a 36-index mesh under [`CUBE`], backed by device buffers.
pub fn cube_assets(device: &MockDevice) -> Arc<RwLock<RenderAssets>> {
    let vertex_buffer = device
        .create_buffer(&BufferDescriptor {
            label: Some("Cube Vertices".into()),
            size: 24 * std::mem::size_of::<MeshVertex>() as u64,
            usage: BufferUsage::VERTEX,
        })
        .unwrap();
    let index_buffer = device
        .create_buffer(&BufferDescriptor {
            label: Some("Cube Indices".into()),
            size: 36 * 4,
            usage: BufferUsage::INDEX,
        })
        .unwrap();
    let mut assets = RenderAssets::new();
    assets.insert_mesh(
        CUBE,
        GpuMesh {
            vertex_buffer,
            index_buffer,
            index_format: IndexFormat::Uint32,
            submeshes: vec![Submesh {
                base_index: 0,
                index_count: 36,
                base_vertex: 0,
            }],
        },
    );
    Arc::new(RwLock::new(assets))
}

/// A renderer over a fresh mock with a 1280x720 viewport already applied.
pub fn renderer(config: RendererConfig) -> (MockDevice, Arc<RwLock<RenderAssets>>, SceneRenderer) {
    init_logging();
    let device = MockDevice::new();
    let assets = cube_assets(&device);
    let mut renderer = SceneRenderer::new(device.as_device(), assets.clone(), config).unwrap();
    renderer.set_viewport_size(1280, 720);
    renderer.recreate().unwrap();
    (device, assets, renderer)
}

pub fn transform(x: f32) -> Mat4 {
    Mat4::from_translation(Vec3::new(x, 0.0, -10.0))
}

/// Events recorded inside the render pass labelled `label`, up to the next pass.
pub fn pass_events(events: &[Event], label: &str) -> Vec<Event> {
    let start = events.iter().position(|event| {
        matches!(event, Event::BeginRenderPass(Some(l)) | Event::BeginComputePass(Some(l)) if l == label)
    });
    let Some(start) = start else {
        return Vec::new();
    };
    events[start + 1..]
        .iter()
        .take_while(|event| {
            !matches!(
                event,
                Event::BeginRenderPass(_) | Event::BeginComputePass(_) | Event::Submit(_)
            )
        })
        .cloned()
        .collect()
}
