mod common;

use common::{Event, Kind, MockDevice, CUBE};
use saturn_agents::{PassLanes, PassState, SceneRenderer};
use saturn_core::config::ShadowSettings;
use saturn_core::lane::{Lane, LaneContext, LaneError, LaneKind};
use saturn_core::math::{Extent2D, Vec3};
use saturn_core::renderer::*;
use saturn_core::RendererConfig;
use saturn_lanes::{RenderPassLane, ResourceAccess};
use std::ops::Range;

fn indexed_draws(events: &[Event]) -> Vec<Range<u32>> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::DrawIndexed { instances, .. } => Some(instances.clone()),
            _ => None,
        })
        .collect()
}

fn submit_row(renderer: &mut SceneRenderer, count: u64, mesh: MeshHandle, material: MaterialHandle) {
    for i in 0..count {
        assert!(renderer.submit_static_mesh(
            EntityId(i),
            mesh,
            material,
            common::transform(i as f32),
            0
        ));
    }
}

#[test]
fn test_thousand_entities_share_one_draw() -> anyhow::Result<()> {
    let (device, _assets, mut renderer) = common::renderer(RendererConfig::default());

    renderer.begin_frame()?;
    submit_row(&mut renderer, 1000, CUBE, MaterialHandle(7));
    device.clear_events();
    renderer.render_scene()?;

    let stats = renderer.stats();
    assert_eq!(stats.draw_calls, 1);
    assert_eq!(stats.instances, 1000);
    assert_eq!(stats.triangles_rendered, 12_000);
    assert_eq!(
        indexed_draws(&common::pass_events(&device.events(), "Geometry")),
        vec![0..1000]
    );
    assert_eq!(device.submission_count(), 1);
    Ok(())
}

#[test]
fn test_transform_offsets_restart_every_frame() -> anyhow::Result<()> {
    let (device, _assets, mut renderer) = common::renderer(RendererConfig::default());

    for _ in 0..3 {
        renderer.begin_frame()?;
        submit_row(&mut renderer, 3, CUBE, MaterialHandle(0));
        device.clear_events();
        renderer.render_scene()?;
        assert_eq!(
            indexed_draws(&common::pass_events(&device.events(), "Geometry")),
            vec![0..3]
        );
    }
    assert_eq!(renderer.stats().frame_number, 3);
    Ok(())
}

#[test]
fn test_zero_viewport_submits_nothing() -> anyhow::Result<()> {
    let (device, _assets, mut renderer) = common::renderer(RendererConfig::default());
    renderer.render_scene()?;
    assert_eq!(device.submission_count(), 1);

    renderer.set_viewport_size(0, 0);
    renderer.begin_frame()?;
    submit_row(&mut renderer, 4, CUBE, MaterialHandle(0));
    renderer.render_scene()?;
    assert_eq!(device.submission_count(), 1);
    assert_eq!(renderer.viewport_size(), Extent2D::new(0, 0));
    assert!(renderer.composite_image().is_some());

    renderer.set_viewport_size(1280, 720);
    renderer.render_scene()?;
    assert_eq!(device.submission_count(), 2);
    assert_eq!(renderer.lifecycle().generation(), 1);
    Ok(())
}

#[test]
fn test_deferred_resize_waits_before_destroying_targets() -> anyhow::Result<()> {
    let (device, _assets, mut renderer) = common::renderer(RendererConfig::default());
    renderer.render_scene()?;
    let old_composite = renderer.composite_image();

    device.clear_events();
    renderer.set_viewport_size(800, 600);
    assert!(device.events().is_empty());
    assert_eq!(renderer.viewport_size(), Extent2D::new(1280, 720));

    renderer.render_scene()?;
    let events = device.events();
    let wait = events
        .iter()
        .position(|event| *event == Event::Wait(SubmissionIndex(1)))
        .expect("resize waited on the in-flight frame");
    let first_destroy = events
        .iter()
        .position(|event| matches!(event, Event::Destroy { kind: Kind::Texture, .. }))
        .expect("old targets destroyed");
    assert!(wait < first_destroy);

    assert_eq!(renderer.viewport_size(), Extent2D::new(800, 600));
    assert_eq!(renderer.lifecycle().extent(), Extent2D::new(800, 600));
    assert_ne!(renderer.composite_image(), old_composite);
    assert!(renderer.last_frame_report().is_complete());
    Ok(())
}

#[test]
fn test_failed_resize_keeps_previous_targets() -> anyhow::Result<()> {
    let (device, _assets, mut renderer) = common::renderer(RendererConfig::default());
    renderer.render_scene()?;
    let live = device.live_count();
    let composite = renderer.composite_image();

    device.fail_label("HDR Target");
    renderer.set_viewport_size(1920, 1080);
    let err = renderer.render_scene().unwrap_err();
    assert!(matches!(
        err,
        RenderError::AllocationFailed { ref resource, .. } if resource == "HDR Target"
    ));
    assert!(err.is_fatal());
    assert_eq!(device.live_count(), live);
    assert_eq!(renderer.composite_image(), composite);
    assert_eq!(renderer.viewport_size(), Extent2D::new(1280, 720));
    assert_eq!(device.submission_count(), 1);

    device.clear_failures();
    renderer.render_scene()?;
    assert_eq!(renderer.viewport_size(), Extent2D::new(1920, 1080));
    assert_eq!(device.submission_count(), 2);
    Ok(())
}

#[test]
fn test_transform_allocation_failure_drops_frame() -> anyhow::Result<()> {
    let (device, _assets, mut renderer) = common::renderer(RendererConfig::default());
    device.fail_label("Instance Transforms");

    renderer.begin_frame()?;
    submit_row(&mut renderer, 2, CUBE, MaterialHandle(0));
    let err = renderer.render_scene().unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(device.submission_count(), 0);

    device.clear_failures();
    renderer.begin_frame()?;
    submit_row(&mut renderer, 2, CUBE, MaterialHandle(0));
    renderer.render_scene()?;
    assert_eq!(device.submission_count(), 1);
    assert_eq!(renderer.stats().instances, 2);
    Ok(())
}

#[test]
fn test_unknown_material_binds_default() -> anyhow::Result<()> {
    let (device, assets, mut renderer) = common::renderer(RendererConfig::default());
    let layout = renderer
        .material_bind_group_layout()
        .expect("geometry lane is initialized");
    let red = device.create_bind_group(&BindGroupDescriptor {
        label: Some("Red"),
        layout,
        entries: &[],
    })?;
    {
        let mut assets = assets.write().unwrap();
        assets.insert_material(MaterialHandle(1), GpuMaterial { bind_group: red });
        let cube = assets.mesh(CUBE).cloned().expect("cube registered");
        assets.insert_mesh(MeshHandle(2), cube);
    }

    let default = BindGroupId(
        device
            .find(Kind::BindGroup, "Default Material")
            .expect("default material exists"),
    );

    renderer.begin_frame()?;
    submit_row(&mut renderer, 1, CUBE, MaterialHandle(1));
    submit_row(&mut renderer, 1, MeshHandle(2), MaterialHandle(99));
    device.clear_events();
    renderer.render_scene()?;
    assert_eq!(
        device.find(Kind::BindGroup, "Default Material"),
        Some(default.0)
    );

    let materials: Vec<BindGroupId> = common::pass_events(&device.events(), "Geometry")
        .into_iter()
        .filter_map(|event| match event {
            Event::SetBindGroup { index: 2, group } => Some(group),
            _ => None,
        })
        .collect();
    assert_eq!(materials, vec![red, default]);
    assert_eq!(renderer.stats().draw_calls, 2);
    Ok(())
}

#[test]
fn test_group_uses_first_submitted_material() -> anyhow::Result<()> {
    let (device, _assets, mut renderer) = common::renderer(RendererConfig::default());

    renderer.begin_frame()?;
    assert!(renderer.submit_static_mesh(EntityId(1), CUBE, MaterialHandle(5), common::transform(0.0), 0));
    assert!(renderer.submit_static_mesh(EntityId(2), CUBE, MaterialHandle(6), common::transform(1.0), 0));
    device.clear_events();
    renderer.render_scene()?;

    let geometry = common::pass_events(&device.events(), "Geometry");
    assert_eq!(indexed_draws(&geometry), vec![0..2]);
    Ok(())
}

#[test]
fn test_unloaded_mesh_is_skipped() -> anyhow::Result<()> {
    let (device, _assets, mut renderer) = common::renderer(RendererConfig::default());

    renderer.begin_frame()?;
    submit_row(&mut renderer, 5, MeshHandle(42), MaterialHandle(0));
    submit_row(&mut renderer, 2, CUBE, MaterialHandle(0));
    device.clear_events();
    renderer.render_scene()?;

    assert_eq!(renderer.stats().draw_calls, 1);
    assert_eq!(renderer.stats().instances, 2);
    assert_eq!(
        indexed_draws(&common::pass_events(&device.events(), "Geometry")),
        vec![0..2]
    );
    assert!(renderer.last_frame_report().skipped.is_empty());
    Ok(())
}

#[test]
fn test_selected_mesh_is_lit_then_outlined() -> anyhow::Result<()> {
    let (device, _assets, mut renderer) = common::renderer(RendererConfig::default());

    renderer.begin_frame()?;
    submit_row(&mut renderer, 2, CUBE, MaterialHandle(0));
    assert!(renderer.submit_selected_mesh(
        EntityId(10),
        CUBE,
        MaterialHandle(0),
        common::transform(5.0),
        0
    ));
    device.clear_events();
    renderer.render_scene()?;

    // Lit main batch, lit selected batch, outline of the selected batch.
    assert_eq!(
        indexed_draws(&common::pass_events(&device.events(), "Geometry")),
        vec![0..2, 2..3, 2..3]
    );
    assert_eq!(renderer.stats().draw_calls, 2);
    assert_eq!(renderer.stats().instances, 3);
    Ok(())
}

#[test]
#[cfg_attr(
    debug_assertions,
    should_panic(expected = "called outside the submission window")
)]
fn test_submit_outside_frame_is_rejected() {
    let (_device, _assets, mut renderer) = common::renderer(RendererConfig::default());
    assert!(!renderer.submit_static_mesh(
        EntityId(0),
        CUBE,
        MaterialHandle(0),
        common::transform(0.0),
        0
    ));
}

#[test]
fn test_dynamic_sky_draws_before_geometry() -> anyhow::Result<()> {
    let (device, _assets, mut renderer) = common::renderer(RendererConfig::default());

    renderer.set_dynamic_sky(2.5, 0.0, 0.3);
    renderer.begin_frame()?;
    submit_row(&mut renderer, 1, CUBE, MaterialHandle(0));
    device.clear_events();
    renderer.render_scene()?;
    let geometry = common::pass_events(&device.events(), "Geometry");
    let sky = geometry
        .iter()
        .position(|event| matches!(event, Event::Draw { .. }))
        .expect("sky drawn");
    let mesh = geometry
        .iter()
        .position(|event| matches!(event, Event::DrawIndexed { .. }))
        .expect("mesh drawn");
    assert!(sky < mesh);

    renderer.clear_dynamic_sky();
    device.clear_events();
    renderer.render_scene()?;
    assert!(!common::pass_events(&device.events(), "Geometry")
        .iter()
        .any(|event| matches!(event, Event::Draw { .. })));
    Ok(())
}

#[test]
fn test_grid_draws_between_sky_and_meshes() -> anyhow::Result<()> {
    let is_grid = |event: &Event| matches!(event, Event::Draw { vertices, .. } if *vertices == (0..6));

    let (device, _assets, mut renderer) = common::renderer(RendererConfig::default());
    renderer.begin_frame()?;
    submit_row(&mut renderer, 1, CUBE, MaterialHandle(0));
    device.clear_events();
    renderer.render_scene()?;
    assert!(!common::pass_events(&device.events(), "Geometry")
        .iter()
        .any(is_grid));
    assert_eq!(device.find(Kind::BindGroup, "Grid"), None);

    let mut config = RendererConfig::default();
    config.grid.enabled = true;
    let (device, _assets, mut renderer) = common::renderer(config);
    renderer.set_dynamic_sky(2.5, 0.0, 0.3);
    renderer.begin_frame()?;
    submit_row(&mut renderer, 2, CUBE, MaterialHandle(0));
    device.clear_events();
    renderer.render_scene()?;

    let geometry = common::pass_events(&device.events(), "Geometry");
    let sky = geometry
        .iter()
        .position(|event| matches!(event, Event::Draw { vertices, .. } if *vertices == (0..3)))
        .expect("sky drawn");
    let grid = geometry.iter().position(is_grid).expect("grid drawn");
    let mesh = geometry
        .iter()
        .position(|event| matches!(event, Event::DrawIndexed { .. }))
        .expect("mesh drawn");
    assert!(sky < grid && grid < mesh);
    assert_eq!(geometry.iter().filter(|event| is_grid(event)).count(), 1);
    assert_eq!(renderer.stats().draw_calls, 1);

    renderer.terminate();
    assert_eq!(device.live_count(), 2);
    Ok(())
}

#[test]
fn test_disabled_shadows_skip_cascade_passes() -> anyhow::Result<()> {
    let mut config = RendererConfig::default();
    config.shadows.enabled = false;
    let (device, _assets, mut renderer) = common::renderer(config);
    renderer.set_lights(Lights {
        directional: vec![DirectionalLight {
            direction: Vec3::new(-0.3, -1.0, -0.2),
            ..Default::default()
        }],
        point: Vec::new(),
    });

    device.clear_events();
    renderer.render_scene()?;
    assert_eq!(renderer.last_frame_report().visited, PassState::sequence(0));
    assert!(!device
        .events()
        .iter()
        .any(|event| matches!(event, Event::BeginRenderPass(Some(label)) if label == "Shadow Cascade")));
    Ok(())
}

#[test]
fn test_shadow_settings_change_rebuilds_atlas() -> anyhow::Result<()> {
    let (device, _assets, mut renderer) = common::renderer(RendererConfig::default());
    renderer.render_scene()?;
    let atlas = device.find(Kind::Texture, "Shadow Atlas").expect("atlas exists");

    renderer.set_shadow_settings(ShadowSettings {
        split_lambda: 0.5,
        ..ShadowSettings::default()
    })?;
    assert_eq!(device.find(Kind::Texture, "Shadow Atlas"), Some(atlas));

    renderer.set_shadow_settings(ShadowSettings {
        cascade_count: 2,
        resolution: 1024,
        ..ShadowSettings::default()
    })?;
    let rebuilt = device.find(Kind::Texture, "Shadow Atlas").expect("atlas rebuilt");
    assert_ne!(rebuilt, atlas);

    renderer.render_scene()?;
    assert_eq!(renderer.last_frame_report().visited, PassState::sequence(2));

    let invalid = renderer.set_shadow_settings(ShadowSettings {
        cascade_count: 0,
        ..ShadowSettings::default()
    });
    assert!(matches!(invalid, Err(RenderError::Internal(_))));
    assert_eq!(device.find(Kind::Texture, "Shadow Atlas"), Some(rebuilt));
    Ok(())
}

struct FailingLane;

impl Lane for FailingLane {
    fn strategy_name(&self) -> &'static str {
        "Failing"
    }

    fn lane_kind(&self) -> LaneKind {
        LaneKind::Render
    }

    fn execute(&self, _ctx: &mut LaneContext) -> Result<(), LaneError> {
        Err(LaneError::missing("Nothing"))
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn std::any::Any {
        self
    }
}

impl RenderPassLane for FailingLane {
    fn accesses(&self) -> &'static [ResourceAccess] {
        &[]
    }
}

#[test]
fn test_failed_pass_is_skipped_and_order_kept() -> anyhow::Result<()> {
    common::init_logging();
    let device = MockDevice::new();
    let assets = common::cube_assets(&device);
    let config = RendererConfig::default();
    let mut lanes = PassLanes::standard(&config);
    lanes.geometry = Box::new(FailingLane);
    let mut renderer = SceneRenderer::with_lanes(device.as_device(), assets, config, lanes)?;
    renderer.set_viewport_size(640, 480);

    renderer.begin_frame()?;
    submit_row(&mut renderer, 3, CUBE, MaterialHandle(0));
    renderer.render_scene()?;

    let report = renderer.last_frame_report();
    assert_eq!(report.visited, PassState::sequence(config.shadows.cascade_count));
    assert!(report.is_complete());
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].state, PassState::Geometry);
    assert_eq!(report.skipped[0].lane, "Failing");
    assert_eq!(renderer.stats().skipped_passes, 1);
    assert_eq!(renderer.stats().draw_calls, 0);
    assert!(renderer.material_bind_group_layout().is_none());

    let events = device.events();
    let bloom = events
        .iter()
        .position(|event| matches!(event, Event::BeginRenderPass(Some(label)) if label == "Bloom"));
    let composite = events
        .iter()
        .position(|event| matches!(event, Event::BeginRenderPass(Some(label)) if label == "Composite"));
    assert!(bloom.is_some() && composite.is_some());
    assert!(bloom < composite);
    assert_eq!(device.submission_count(), 1);
    Ok(())
}

#[test]
fn test_terminate_releases_everything() -> anyhow::Result<()> {
    let (device, _assets, mut renderer) = common::renderer(RendererConfig::default());
    // The cube's vertex and index buffers belong to the test.
    let baseline = 2;

    renderer.set_lights(Lights {
        directional: vec![DirectionalLight {
            direction: Vec3::new(0.2, -1.0, 0.1),
            ..Default::default()
        }],
        point: (0..100)
            .map(|i| PointLight {
                position: Vec3::new(i as f32, 1.0, -5.0),
                ..Default::default()
            })
            .collect(),
    });
    renderer.set_dynamic_sky(3.0, 1.0, 0.4);
    for frame in 0..4 {
        renderer.begin_frame()?;
        submit_row(&mut renderer, 2000, CUBE, MaterialHandle(0));
        assert!(renderer.submit_selected_mesh(
            EntityId(9999),
            CUBE,
            MaterialHandle(0),
            common::transform(0.0),
            0
        ));
        renderer.render_scene()?;
        if frame == 1 {
            renderer.set_viewport_size(1024, 768);
        }
    }
    assert!(device.live_count() > baseline);

    renderer.terminate();
    assert_eq!(device.live_count(), baseline);
    drop(renderer);
    assert_eq!(device.live_count(), baseline);
    assert_eq!(device.unknown_destroys(), 0);
    Ok(())
}

#[test]
fn test_terminated_renderer_refuses_frames() {
    let (_device, _assets, mut renderer) = common::renderer(RendererConfig::default());
    renderer.terminate();
    assert!(matches!(
        renderer.begin_frame(),
        Err(RenderError::NotInitialized)
    ));
}
