use std::sync::Arc;

use anyhow::{anyhow, Result};
use glam::Mat4;
use wgpu::util::DeviceExt;
use winit::dpi::PhysicalSize;
use winit::event_loop::ActiveEventLoop;
use winit::window::Window;

use crate::geometry_registry::Geometry;
use crate::material_registry::{material_gpu_from_parts, MaterialGpu};
use crate::texture_cache::{RealizedTexture, TextureColorSpace, TexturePixels};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct Globals {
    view_proj: [[f32; 4]; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct InstanceData {
    pub model: [[f32; 4]; 4],
    pub color: [f32; 4],
}

#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
pub struct LineVertex {
    pub position: [f32; 3],
    pub color: [f32; 3],
}

pub struct GpuGeometry {
    pub vertex_buffer: wgpu::Buffer,
    pub index_buffer: wgpu::Buffer,
    pub index_count: u32,
}

pub struct GpuTexture {
    _texture: Arc<wgpu::Texture>,
    view: Arc<wgpu::TextureView>,
    pub srgb: bool,
}

impl GpuTexture {
    pub fn view(&self) -> &wgpu::TextureView {
        self.view.as_ref()
    }

    pub fn view_arc(&self) -> Arc<wgpu::TextureView> {
        self.view.clone()
    }
}

/// One mesh draw in the main pass; instance data lives at `instance_index` in
/// the shared per-frame instance buffer.
pub struct MeshDraw<'a> {
    pub geometry: &'a GpuGeometry,
    pub material: Option<&'a wgpu::BindGroup>,
    pub instance_index: u32,
}

/// Owns the render surface and device. Everything is `Option` so managers and
/// tests run headless; GPU resources realize lazily once a window exists.
pub struct Renderer {
    surface: Option<wgpu::Surface<'static>>,
    device: Option<wgpu::Device>,
    queue: Option<wgpu::Queue>,
    config: Option<wgpu::SurfaceConfiguration>,
    size: PhysicalSize<u32>,
    window: Option<Arc<Window>>,
    vsync: bool,

    depth_view: Option<wgpu::TextureView>,
    mesh_pipeline: Option<wgpu::RenderPipeline>,
    line_pipeline: Option<wgpu::RenderPipeline>,
    globals_buf: Option<wgpu::Buffer>,
    globals_bg: Option<wgpu::BindGroup>,
    material_bgl: Option<wgpu::BindGroupLayout>,
    sampler: Option<Arc<wgpu::Sampler>>,
    default_base_color: Option<Arc<wgpu::TextureView>>,
    default_normal: Option<Arc<wgpu::TextureView>>,
    fallback_material: Option<Arc<MaterialGpu>>,

    instance_buffer: Option<wgpu::Buffer>,
    instance_capacity: usize,
    helper_buffer: Option<wgpu::Buffer>,
    helper_capacity: usize,
    grid_buffer: Option<wgpu::Buffer>,
    grid_capacity: usize,
}

impl Renderer {
    pub fn new(size: PhysicalSize<u32>, vsync: bool) -> Self {
        Self {
            surface: None,
            device: None,
            queue: None,
            config: None,
            size,
            window: None,
            vsync,
            depth_view: None,
            mesh_pipeline: None,
            line_pipeline: None,
            globals_buf: None,
            globals_bg: None,
            material_bgl: None,
            sampler: None,
            default_base_color: None,
            default_normal: None,
            fallback_material: None,
            instance_buffer: None,
            instance_capacity: 0,
            helper_buffer: None,
            helper_capacity: 0,
            grid_buffer: None,
            grid_capacity: 0,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    pub fn device(&self) -> Result<&wgpu::Device> {
        self.device.as_ref().ok_or_else(|| anyhow!("Renderer has no device yet"))
    }

    pub fn queue(&self) -> Result<&wgpu::Queue> {
        self.queue.as_ref().ok_or_else(|| anyhow!("Renderer has no queue yet"))
    }

    pub fn size(&self) -> PhysicalSize<u32> {
        self.size
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.size.height == 0 {
            1.0
        } else {
            self.size.width as f32 / self.size.height as f32
        }
    }

    pub fn window(&self) -> Option<&Window> {
        self.window.as_deref()
    }

    pub fn ensure_window(&mut self, event_loop: &ActiveEventLoop, title: &str) -> Result<()> {
        if self.window.is_some() {
            return Ok(());
        }
        let window = Arc::new(
            event_loop
                .create_window(
                    Window::default_attributes().with_title(title).with_inner_size(self.size),
                )
                .map_err(|err| anyhow!("Failed to create window: {err}"))?,
        );
        pollster::block_on(self.init_wgpu(&window))?;
        self.ensure_pipelines()?;
        self.window = Some(window);
        Ok(())
    }

    fn choose_surface_format(formats: &[wgpu::TextureFormat]) -> wgpu::TextureFormat {
        formats.iter().copied().find(|f| f.is_srgb()).unwrap_or(formats[0])
    }

    async fn init_wgpu(&mut self, window: &Arc<Window>) -> Result<()> {
        let instance = wgpu::Instance::default();
        let surface = instance
            .create_surface(window.clone())
            .map_err(|err| anyhow!("Failed to create surface: {err}"))?;
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| anyhow!("No compatible adapter: {err}"))?;
        let required_limits = wgpu::Limits::downlevel_webgl2_defaults().using_resolution(adapter.limits());
        let device_desc = wgpu::DeviceDescriptor {
            label: Some("Device"),
            required_features: wgpu::Features::empty(),
            required_limits,
            experimental_features: wgpu::ExperimentalFeatures::default(),
            memory_hints: wgpu::MemoryHints::default(),
            trace: wgpu::Trace::default(),
        };
        let (device, queue) = adapter
            .request_device(&device_desc)
            .await
            .map_err(|err| anyhow!("Failed to acquire device: {err}"))?;

        let caps = surface.get_capabilities(&adapter);
        let format = Self::choose_surface_format(&caps.formats);
        let size = window.inner_size();
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: if self.vsync {
                wgpu::PresentMode::Fifo
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: caps.alpha_modes[0],
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        self.surface = Some(surface);
        self.device = Some(device);
        self.queue = Some(queue);
        self.config = Some(config);
        self.size = size;
        self.rebuild_depth();
        Ok(())
    }

    pub fn resize(&mut self, new_size: PhysicalSize<u32>) {
        self.size = new_size;
        if new_size.width > 0 && new_size.height > 0 {
            if let (Some(surface), Some(device), Some(config)) =
                (&self.surface, &self.device, &mut self.config)
            {
                config.width = new_size.width;
                config.height = new_size.height;
                surface.configure(device, config);
            }
            self.rebuild_depth();
        }
    }

    fn rebuild_depth(&mut self) {
        let Some(device) = &self.device else {
            return;
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Depth Texture"),
            size: wgpu::Extent3d {
                width: self.size.width.max(1),
                height: self.size.height.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });
        self.depth_view = Some(texture.create_view(&wgpu::TextureViewDescriptor::default()));
    }

    fn ensure_pipelines(&mut self) -> Result<()> {
        if self.mesh_pipeline.is_some() {
            return Ok(());
        }
        let device = self.device()?;
        let surface_format = self.config.as_ref().expect("surface configured").format;

        let mesh_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Scene Mesh Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../assets/shaders/scene_mesh.wgsl").into()),
        });
        let line_shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Edit Lines Shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../assets/shaders/edit_lines.wgsl").into()),
        });

        let globals_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Globals BGL"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let globals_buf = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Globals Buffer"),
            size: std::mem::size_of::<Globals>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let globals_bg = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Globals BG"),
            layout: &globals_bgl,
            entries: &[wgpu::BindGroupEntry { binding: 0, resource: globals_buf.as_entire_binding() }],
        });

        let material_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Material BGL"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        multisampled: false,
                        view_dimension: wgpu::TextureViewDimension::D2,
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let mesh_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Mesh Pipeline Layout"),
            bind_group_layouts: &[&globals_bgl, &material_bgl],
            push_constant_ranges: &[],
        });
        let vertex_layout = wgpu::VertexBufferLayout {
            array_stride: (std::mem::size_of::<f32>() * 8) as u64,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &[
                wgpu::VertexAttribute { shader_location: 0, format: wgpu::VertexFormat::Float32x3, offset: 0 },
                wgpu::VertexAttribute { shader_location: 1, format: wgpu::VertexFormat::Float32x3, offset: 12 },
                wgpu::VertexAttribute { shader_location: 2, format: wgpu::VertexFormat::Float32x2, offset: 24 },
            ],
        };
        let instance_layout = wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<InstanceData>() as u64,
            step_mode: wgpu::VertexStepMode::Instance,
            attributes: &[
                wgpu::VertexAttribute { shader_location: 3, format: wgpu::VertexFormat::Float32x4, offset: 0 },
                wgpu::VertexAttribute { shader_location: 4, format: wgpu::VertexFormat::Float32x4, offset: 16 },
                wgpu::VertexAttribute { shader_location: 5, format: wgpu::VertexFormat::Float32x4, offset: 32 },
                wgpu::VertexAttribute { shader_location: 6, format: wgpu::VertexFormat::Float32x4, offset: 48 },
                wgpu::VertexAttribute { shader_location: 7, format: wgpu::VertexFormat::Float32x4, offset: 64 },
            ],
        };
        let mesh_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Mesh Pipeline"),
            layout: Some(&mesh_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &mesh_shader,
                entry_point: Some("vs_main"),
                buffers: &[vertex_layout, instance_layout],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &mesh_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let line_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Line Pipeline Layout"),
            bind_group_layouts: &[&globals_bgl],
            push_constant_ranges: &[],
        });
        let line_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Line Pipeline"),
            layout: Some(&line_pipeline_layout),
            vertex: wgpu::VertexState {
                module: &line_shader,
                entry_point: Some("vs_main"),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: std::mem::size_of::<LineVertex>() as u64,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &[
                        wgpu::VertexAttribute {
                            shader_location: 0,
                            format: wgpu::VertexFormat::Float32x3,
                            offset: 0,
                        },
                        wgpu::VertexAttribute {
                            shader_location: 1,
                            format: wgpu::VertexFormat::Float32x3,
                            offset: 12,
                        },
                    ],
                }],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &line_shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_format,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::LineList,
                ..Default::default()
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: false,
                depth_compare: wgpu::CompareFunction::LessEqual,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        self.mesh_pipeline = Some(mesh_pipeline);
        self.line_pipeline = Some(line_pipeline);
        self.globals_buf = Some(globals_buf);
        self.globals_bg = Some(globals_bg);
        self.material_bgl = Some(material_bgl);
        self.ensure_defaults()?;
        Ok(())
    }

    fn ensure_defaults(&mut self) -> Result<()> {
        if self.default_base_color.is_some() {
            return Ok(());
        }
        let device = self.device()?.clone();
        let queue = self.queue()?.clone();
        let sampler = Arc::new(device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Material Sampler"),
            address_mode_u: wgpu::AddressMode::Repeat,
            address_mode_v: wgpu::AddressMode::Repeat,
            address_mode_w: wgpu::AddressMode::Repeat,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        }));
        let base = upload_pixel_texture(
            &device,
            &queue,
            1,
            1,
            &[255, 255, 255, 255],
            wgpu::TextureFormat::Rgba8UnormSrgb,
        );
        let normal = upload_pixel_texture(
            &device,
            &queue,
            1,
            1,
            &[128, 128, 255, 255],
            wgpu::TextureFormat::Rgba8Unorm,
        );
        self.sampler = Some(sampler);
        self.default_base_color = Some(Arc::new(base.create_view(&wgpu::TextureViewDescriptor::default())));
        self.default_normal = Some(Arc::new(normal.create_view(&wgpu::TextureViewDescriptor::default())));
        Ok(())
    }

    pub fn material_sampler(&self) -> Result<Arc<wgpu::Sampler>> {
        self.sampler.clone().ok_or_else(|| anyhow!("Renderer defaults not initialized"))
    }

    pub fn default_base_color(&mut self) -> Result<Arc<wgpu::TextureView>> {
        self.ensure_defaults()?;
        Ok(self.default_base_color.clone().expect("defaults initialized"))
    }

    pub fn default_normal(&mut self) -> Result<Arc<wgpu::TextureView>> {
        self.ensure_defaults()?;
        Ok(self.default_normal.clone().expect("defaults initialized"))
    }

    pub fn create_gpu_geometry(&mut self, geometry: &Geometry) -> Result<GpuGeometry> {
        let device = self.device()?;
        let mut vertices: Vec<f32> = Vec::with_capacity(geometry.positions.len() * 8);
        for (i, position) in geometry.positions.iter().enumerate() {
            let normal = geometry.normals.get(i).copied().unwrap_or([0.0, 1.0, 0.0]);
            let uv = geometry.uvs.get(i).copied().unwrap_or([0.0, 0.0]);
            vertices.extend_from_slice(position);
            vertices.extend_from_slice(&normal);
            vertices.extend_from_slice(&uv);
        }
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Geometry VB"),
            contents: bytemuck::cast_slice(&vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Geometry IB"),
            contents: bytemuck::cast_slice(&geometry.indices),
            usage: wgpu::BufferUsages::INDEX,
        });
        Ok(GpuGeometry { vertex_buffer, index_buffer, index_count: geometry.indices.len() as u32 })
    }

    pub fn create_gpu_texture(&mut self, texture: &RealizedTexture) -> Result<GpuTexture> {
        let device = self.device()?.clone();
        let queue = self.queue()?.clone();
        let (gpu, srgb) = match &texture.pixels {
            TexturePixels::Rgba8 { width, height, data } => {
                let srgb = texture.color_space == TextureColorSpace::Srgb;
                let format = if srgb {
                    wgpu::TextureFormat::Rgba8UnormSrgb
                } else {
                    wgpu::TextureFormat::Rgba8Unorm
                };
                (upload_pixel_texture(&device, &queue, *width, *height, data, format), srgb)
            }
            TexturePixels::RgbF32 { width, height, data } => {
                let mut rgba = Vec::with_capacity((*width as usize) * (*height as usize) * 4);
                for chunk in data.chunks_exact(3) {
                    rgba.extend_from_slice(chunk);
                    rgba.push(1.0);
                }
                (
                    upload_pixel_texture(
                        &device,
                        &queue,
                        *width,
                        *height,
                        bytemuck::cast_slice(&rgba),
                        wgpu::TextureFormat::Rgba32Float,
                    ),
                    false,
                )
            }
        };
        let view = gpu.create_view(&wgpu::TextureViewDescriptor::default());
        Ok(GpuTexture { _texture: Arc::new(gpu), view: Arc::new(view), srgb })
    }

    pub fn create_material_gpu(
        &mut self,
        uniform_bytes: &[u8],
        base_color: &Arc<wgpu::TextureView>,
        normal: &Arc<wgpu::TextureView>,
    ) -> Result<MaterialGpu> {
        self.ensure_defaults()?;
        let device = self.device()?;
        let layout = self
            .material_bgl
            .as_ref()
            .ok_or_else(|| anyhow!("Material layout not built yet"))?;
        let sampler = self.sampler.as_ref().expect("defaults initialized");
        let uniform_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("Material Uniform Buffer"),
            contents: uniform_bytes,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Material Bind Group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry { binding: 0, resource: uniform_buffer.as_entire_binding() },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(base_color.as_ref()),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(normal.as_ref()),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(sampler.as_ref()),
                },
            ],
        });
        Ok(material_gpu_from_parts(bind_group, uniform_buffer))
    }

    pub fn fallback_material(&mut self) -> Result<Arc<MaterialGpu>> {
        if let Some(material) = &self.fallback_material {
            return Ok(material.clone());
        }
        let base = self.default_base_color()?;
        let normal = self.default_normal()?;
        let uniform: [f32; 16] = [
            1.0, 1.0, 1.0, 1.0, // color
            0.0, 0.0, 0.0, 1.0, // emissive
            0.0, 1.0, 1.0, 1.0, // params
            0.0, 0.0, 0.0, 0.0, // texture flags
        ];
        let material = Arc::new(self.create_material_gpu(bytemuck::cast_slice(&uniform), &base, &normal)?);
        self.fallback_material = Some(material.clone());
        Ok(material)
    }

    fn ensure_vertex_capacity(
        device: &wgpu::Device,
        buffer: &mut Option<wgpu::Buffer>,
        capacity: &mut usize,
        needed: usize,
        stride: usize,
        label: &str,
    ) {
        if *capacity >= needed && buffer.is_some() {
            return;
        }
        let mut new_cap = (*capacity).max(256);
        while new_cap < needed {
            new_cap *= 2;
        }
        *buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: (new_cap * stride) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        }));
        *capacity = new_cap;
    }

    /// Draws the frame as three composited passes over one surface: the main
    /// scene clears, then the helper scene and the grid overlay load what is
    /// already there. That is the whole "auto-clear off between layers"
    /// contract.
    pub fn render_frame(
        &mut self,
        view_proj: Mat4,
        draws: &[MeshDraw<'_>],
        instances: &[InstanceData],
        helper_lines: &[LineVertex],
        grid_lines: &[LineVertex],
    ) -> Result<(), wgpu::SurfaceError> {
        let (Some(surface), Some(device), Some(queue)) = (&self.surface, &self.device, &self.queue)
        else {
            return Ok(());
        };

        queue.write_buffer(
            self.globals_buf.as_ref().expect("pipelines built"),
            0,
            bytemuck::bytes_of(&Globals { view_proj: view_proj.to_cols_array_2d() }),
        );
        if !instances.is_empty() {
            Self::ensure_vertex_capacity(
                device,
                &mut self.instance_buffer,
                &mut self.instance_capacity,
                instances.len(),
                std::mem::size_of::<InstanceData>(),
                "Instance Buffer",
            );
            queue.write_buffer(
                self.instance_buffer.as_ref().expect("instance buffer sized"),
                0,
                bytemuck::cast_slice(instances),
            );
        }
        if !helper_lines.is_empty() {
            Self::ensure_vertex_capacity(
                device,
                &mut self.helper_buffer,
                &mut self.helper_capacity,
                helper_lines.len(),
                std::mem::size_of::<LineVertex>(),
                "Helper Line Buffer",
            );
            queue.write_buffer(
                self.helper_buffer.as_ref().expect("helper buffer sized"),
                0,
                bytemuck::cast_slice(helper_lines),
            );
        }
        if !grid_lines.is_empty() {
            Self::ensure_vertex_capacity(
                device,
                &mut self.grid_buffer,
                &mut self.grid_capacity,
                grid_lines.len(),
                std::mem::size_of::<LineVertex>(),
                "Grid Line Buffer",
            );
            queue.write_buffer(
                self.grid_buffer.as_ref().expect("grid buffer sized"),
                0,
                bytemuck::cast_slice(grid_lines),
            );
        }

        let frame = surface.get_current_texture()?;
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = self.depth_view.as_ref().expect("depth built with surface");
        let mut encoder =
            device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("Frame Encoder") });

        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Scene Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color { r: 0.09, g: 0.1, b: 0.12, a: 1.0 }),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(self.mesh_pipeline.as_ref().expect("pipelines built"));
            pass.set_bind_group(0, self.globals_bg.as_ref().expect("pipelines built"), &[]);
            if let Some(instance_buffer) = &self.instance_buffer {
                for draw in draws {
                    let Some(material) = draw.material else {
                        continue;
                    };
                    pass.set_bind_group(1, material, &[]);
                    pass.set_vertex_buffer(0, draw.geometry.vertex_buffer.slice(..));
                    let stride = std::mem::size_of::<InstanceData>() as u64;
                    let offset = draw.instance_index as u64 * stride;
                    pass.set_vertex_buffer(1, instance_buffer.slice(offset..offset + stride));
                    pass.set_index_buffer(draw.geometry.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..draw.geometry.index_count, 0, 0..1);
                }
            }
        }

        for (label, buffer, count) in [
            ("Helper Pass", &self.helper_buffer, helper_lines.len()),
            ("Grid Pass", &self.grid_buffer, grid_lines.len()),
        ] {
            if count == 0 {
                continue;
            }
            let Some(buffer) = buffer else {
                continue;
            };
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations { load: wgpu::LoadOp::Load, store: wgpu::StoreOp::Store },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(self.line_pipeline.as_ref().expect("pipelines built"));
            pass.set_bind_group(0, self.globals_bg.as_ref().expect("pipelines built"), &[]);
            pass.set_vertex_buffer(
                0,
                buffer.slice(..(count * std::mem::size_of::<LineVertex>()) as u64),
            );
            pass.draw(0..count as u32, 0..1);
        }

        queue.submit(std::iter::once(encoder.finish()));
        frame.present();
        Ok(())
    }
}

fn padded_bytes_per_row(row_bytes: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    let remainder = row_bytes % align;
    if remainder == 0 {
        row_bytes
    } else {
        row_bytes + align - remainder
    }
}

fn upload_pixel_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    width: u32,
    height: u32,
    data: &[u8],
    format: wgpu::TextureFormat,
) -> wgpu::Texture {
    let bytes_per_pixel = (data.len() as u32 / width.max(1) / height.max(1)).max(1);
    let row_bytes = width * bytes_per_pixel;
    let padded_row_bytes = padded_bytes_per_row(row_bytes);
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("Image Texture"),
        size: wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    let upload: std::borrow::Cow<'_, [u8]> = if padded_row_bytes == row_bytes {
        std::borrow::Cow::Borrowed(data)
    } else {
        let mut padded = vec![0u8; (padded_row_bytes * height) as usize];
        for row in 0..height {
            let src_start = (row_bytes * row) as usize;
            let dst_start = (padded_row_bytes * row) as usize;
            let src_end = src_start + row_bytes as usize;
            if src_end <= data.len() {
                padded[dst_start..dst_start + row_bytes as usize]
                    .copy_from_slice(&data[src_start..src_end]);
            }
        }
        std::borrow::Cow::Owned(padded)
    };
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        upload.as_ref(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(padded_row_bytes),
            rows_per_image: Some(height),
        },
        wgpu::Extent3d { width, height, depth_or_array_layers: 1 },
    );
    texture
}
