//! Headless frame loop: a small deferred pipeline driven by a layer stack.
//!
//! ```text
//! cargo run --example frame_loop -- --frames 120 --frames-in-flight 3 --latency-ms 4
//! RUST_LOG=trace cargo run --example frame_loop -- --frames 4
//! cargo run --example frame_loop --features vulkan -- --backend vulkan
//! ```

use std::any::Any;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use frame_graph::{
    Asset, AssetHandle, AssetRegistry, AssetType, BackendType, GraphicsContext, GraphicsResult,
    Layer, LayerStack, Pass, PassContext, PassSetupContext, RecordedCommand, RenderCommand,
    RenderGraph, RenderPass, RendererConfig, TextureDescriptor, TextureFormat, TextureUsage,
};
use glam::{Mat4, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
enum CliBackend {
    /// CPU-side mock queue.
    #[default]
    Dummy,
    /// Native Vulkan via ash (requires the `vulkan` feature).
    Vulkan,
}

impl From<CliBackend> for BackendType {
    fn from(cli: CliBackend) -> Self {
        match cli {
            CliBackend::Dummy => BackendType::Dummy,
            CliBackend::Vulkan => BackendType::Vulkan,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "frame_loop", about = "Run a render graph for a number of frames", version)]
struct Args {
    /// Graphics backend to use.
    #[arg(long, default_value = "dummy", value_enum)]
    backend: CliBackend,

    /// Number of frames to render.
    #[arg(long, default_value = "60")]
    frames: u64,

    /// Frame slots recorded ahead of the GPU.
    #[arg(long, default_value = "2")]
    frames_in_flight: u32,

    /// Simulated GPU time per submission (dummy backend only).
    #[arg(long, default_value = "0")]
    latency_ms: u64,

    /// Initial viewport width in pixels.
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Initial viewport height in pixels.
    #[arg(long, default_value = "720")]
    height: u32,

    /// Resize the viewport to WIDTHxHEIGHT halfway through the run.
    #[arg(long, value_parser = parse_size)]
    resize: Option<(u32, u32)>,
}

type DemoResult<T> = Result<T, Box<dyn std::error::Error>>;

fn parse_size(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
    let w = w.parse().map_err(|e| format!("bad width: {e}"))?;
    let h = h.parse().map_err(|e| format!("bad height: {e}"))?;
    Ok((w, h))
}

struct NamedAsset {
    name: String,
    kind: AssetType,
}

impl Asset for NamedAsset {
    fn asset_type(&self) -> AssetType {
        self.kind
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Writes the G-buffer targets and owns their size-dependent textures.
struct GBufferPass;

impl GBufferPass {
    const TARGETS: [(&'static str, TextureFormat); 3] = [
        ("albedo", TextureFormat::Rgba8Unorm),
        ("normal", TextureFormat::Rgba16Float),
        ("depth", TextureFormat::Depth32Float),
    ];

    fn create_targets(ctx: &mut PassSetupContext<'_>) -> GraphicsResult<()> {
        let (width, height) = ctx.screen_size();
        for (name, format) in Self::TARGETS {
            let descriptor = TextureDescriptor::new_2d(
                width,
                height,
                format,
                TextureUsage::RENDER_ATTACHMENT | TextureUsage::TEXTURE_BINDING,
            )
            .with_label(name);
            ctx.create_texture(name, descriptor)?;
        }
        Ok(())
    }
}

impl RenderPass for GBufferPass {
    fn record(&mut self, ctx: &mut PassContext<'_>) -> GraphicsResult<()> {
        let draws = ctx
            .commands()
            .iter()
            .filter(|command| matches!(command, RenderCommand::DrawMesh { .. }))
            .count();
        for _ in 0..draws {
            ctx.record(RecordedCommand::Draw {
                vertex_count: 36,
                instance_count: 1,
            })?;
        }
        Ok(())
    }

    fn setup(&mut self, ctx: &mut PassSetupContext<'_>) -> GraphicsResult<()> {
        Self::create_targets(ctx)
    }

    fn resize(&mut self, ctx: &mut PassSetupContext<'_>) -> GraphicsResult<()> {
        Self::create_targets(ctx)
    }
}

fn fullscreen(ctx: &mut PassContext<'_>) -> GraphicsResult<()> {
    ctx.record(RecordedCommand::Draw {
        vertex_count: 3,
        instance_count: 1,
    })?;
    Ok(())
}

fn build_graph(context: Arc<GraphicsContext>) -> DemoResult<RenderGraph> {
    let mut graph = RenderGraph::new(context);
    graph.add_render_pass(
        Pass::new("gbuffer", GBufferPass).writes(["albedo", "normal", "depth"]),
    )?;
    graph.add_pass("lighting", &["albedo", "normal", "depth"], &["hdr"], fullscreen)?;
    graph.add_pass("bloom", &["hdr"], &["bloom"], |ctx| {
        ctx.record(RecordedCommand::Dispatch { x: 80, y: 45, z: 1 })?;
        Ok(())
    })?;
    graph.add_pass("tonemap", &["hdr", "bloom"], &["ldr"], fullscreen)?;
    graph.add_pass("ui", &[], &["overlay"], |ctx| {
        let label = format!("frame {}", ctx.frame_number());
        ctx.record(RecordedCommand::Marker(label))?;
        Ok(())
    })?;
    graph.add_dependency("ui", "tonemap")?;
    graph.compile()?;
    Ok(graph)
}

struct RenderLayer {
    graph: RenderGraph,
    assets: AssetRegistry,
    mesh: AssetHandle,
    material: AssetHandle,
    angle: f32,
    frames: u64,
    resize_at: Option<(u64, (u32, u32))>,
}

impl Layer for RenderLayer {
    fn name(&self) -> &str {
        "render"
    }

    fn on_update(&mut self, dt: f32) {
        self.angle += dt;
        for i in 0..4 {
            let offset = Vec3::new(i as f32 * 2.0, 0.0, 0.0);
            self.graph.push_command(RenderCommand::DrawMesh {
                mesh: self.mesh,
                material: self.material,
                transform: Mat4::from_translation(offset) * Mat4::from_rotation_y(self.angle),
            });
        }
    }

    fn on_render(&mut self, _dt: f32) -> GraphicsResult<()> {
        if let Some((frame, (width, height))) = self.resize_at {
            if self.frames == frame {
                self.graph.request_resize(width, height);
            }
        }
        self.graph.execute(&[])?;
        self.graph.next_frame();
        self.frames += 1;
        Ok(())
    }

    fn on_ui_render(&mut self, _dt: f32) {
        if self.frames % 30 == 0 {
            let recorded: usize = self.graph.stats().iter().map(|s| s.commands).sum();
            log::info!(
                "frame {}: {} command(s), {} asset(s) loaded",
                self.frames,
                recorded,
                self.assets.len()
            );
        }
    }
}

fn main() -> DemoResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = RendererConfig::new()
        .with_backend(args.backend.into())
        .with_frames_in_flight(args.frames_in_flight)
        .with_size(args.width, args.height);
    if args.latency_ms > 0 {
        config = config.with_dummy_latency(Duration::from_millis(args.latency_ms));
    }
    let context = GraphicsContext::new(config)?;
    let graph = build_graph(Arc::clone(&context))?;
    log::info!("Pass order: {}", graph.compiled_order().join(" -> "));

    let assets = AssetRegistry::new();
    let mesh = assets.insert(Arc::new(NamedAsset {
        name: "cube".into(),
        kind: AssetType::Mesh,
    }));
    let material = assets.insert(Arc::new(NamedAsset {
        name: "default".into(),
        kind: AssetType::Material,
    }));

    let mut layers = LayerStack::new();
    layers.push_layer(RenderLayer {
        graph,
        assets,
        mesh,
        material,
        angle: 0.0,
        frames: 0,
        resize_at: args.resize.map(|size| (args.frames / 2, size)),
    });

    let started = Instant::now();
    let mut last = started;
    for _ in 0..args.frames {
        let now = Instant::now();
        let dt = (now - last).as_secs_f32();
        last = now;
        if let Err(e) = layers.run_frame(dt) {
            log::error!("Frame dropped: {}", e);
        }
    }

    context.wait_idle()?;
    let elapsed = started.elapsed();
    log::info!(
        "Rendered {} frame(s) in {:.2?} ({:.1} fps)",
        args.frames,
        elapsed,
        args.frames as f64 / elapsed.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}
