mod common;

use common::{Event, Kind, MockDevice};
use saturn_agents::{FrameSync, ResourceLifecycle};
use saturn_core::config::ShadowSettings;
use saturn_core::math::Extent2D;
use saturn_core::renderer::*;
use saturn_core::RendererConfig;
use saturn_lanes::FrameResource;

fn initialized(device: &MockDevice) -> ResourceLifecycle {
    common::init_logging();
    let mut lifecycle = ResourceLifecycle::new(&RendererConfig::default());
    lifecycle.initialize(device).unwrap();
    lifecycle
}

#[test]
fn test_recreate_is_idempotent() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let mut sync = FrameSync::new();
    let mut lifecycle = initialized(&device);
    let hd = Extent2D::new(1280, 720);

    assert!(lifecycle.recreate(&device, hd, &mut sync)?);
    let live = device.live_count();
    let generation = lifecycle.generation();

    assert!(!lifecycle.recreate(&device, hd, &mut sync)?);
    assert_eq!(device.live_count(), live);
    assert_eq!(lifecycle.generation(), generation);

    assert!(lifecycle.recreate(&device, Extent2D::new(800, 600), &mut sync)?);
    assert!(lifecycle.recreate(&device, hd, &mut sync)?);
    assert_eq!(device.live_count(), live);
    assert_eq!(lifecycle.generation(), generation + 2);

    lifecycle.destroy(&device);
    assert_eq!(device.live_count(), 0);
    assert_eq!(device.unknown_destroys(), 0);
    Ok(())
}

#[test]
fn test_empty_extent_keeps_targets() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let mut sync = FrameSync::new();
    let mut lifecycle = initialized(&device);
    lifecycle.recreate(&device, Extent2D::new(640, 480), &mut sync)?;
    let composite = lifecycle.composite_view();

    device.clear_events();
    assert!(!lifecycle.recreate(&device, Extent2D::new(0, 480), &mut sync)?);
    assert!(device.events().is_empty());
    assert_eq!(lifecycle.extent(), Extent2D::new(640, 480));
    assert_eq!(lifecycle.composite_view(), composite);
    Ok(())
}

#[test]
fn test_failed_recreate_is_atomic() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let mut sync = FrameSync::new();
    let mut lifecycle = initialized(&device);
    lifecycle.recreate(&device, Extent2D::new(1280, 720), &mut sync)?;
    let live = device.live_count();
    let composite = lifecycle.composite_view();

    device.fail_label("Bloom Chain");
    let err = lifecycle
        .recreate(&device, Extent2D::new(1920, 1080), &mut sync)
        .unwrap_err();
    assert!(matches!(
        err,
        RenderError::AllocationFailed { ref resource, .. } if resource == "Bloom Chain"
    ));
    assert_eq!(device.live_count(), live);
    assert_eq!(lifecycle.extent(), Extent2D::new(1280, 720));
    assert_eq!(lifecycle.composite_view(), composite);
    assert_eq!(lifecycle.generation(), 1);

    device.clear_failures();
    assert!(lifecycle.recreate(&device, Extent2D::new(1920, 1080), &mut sync)?);
    assert_eq!(lifecycle.generation(), 2);
    Ok(())
}

#[test]
fn test_recreate_waits_for_every_frame_in_flight() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let mut sync = FrameSync::new();
    let mut lifecycle = initialized(&device);
    lifecycle.recreate(&device, Extent2D::new(1280, 720), &mut sync)?;

    for _ in 0..2 {
        sync.begin_frame(&device)?;
        let encoder = device.create_command_encoder(None);
        sync.end_frame(Some(device.submit_command_buffer(encoder.finish())));
    }
    device.clear_events();
    lifecycle.recreate(&device, Extent2D::new(800, 600), &mut sync)?;

    let events = device.events();
    assert_eq!(events[0], Event::Wait(SubmissionIndex(1)));
    assert_eq!(events[1], Event::Wait(SubmissionIndex(2)));
    let first_destroy = events
        .iter()
        .position(|event| matches!(event, Event::Destroy { .. }))
        .expect("old targets destroyed");
    assert!(first_destroy > 1);
    assert!(!sync.has_pending());
    Ok(())
}

#[test]
fn test_shadow_atlas_rebuilt_only_when_its_shape_changes() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let mut sync = FrameSync::new();
    let mut lifecycle = initialized(&device);
    let defaults = *lifecycle.shadow_settings();

    device.clear_events();
    let tuned = ShadowSettings {
        split_lambda: 0.4,
        far_offset: 120.0,
        ..defaults
    };
    assert!(!lifecycle.set_shadow_settings(&device, tuned, &mut sync)?);
    assert!(device.events().is_empty());
    assert_eq!(lifecycle.shadow_settings().split_lambda, 0.4);

    let smaller = ShadowSettings {
        resolution: 512,
        ..defaults
    };
    assert!(lifecycle.set_shadow_settings(&device, smaller, &mut sync)?);
    let destroyed_textures = device
        .events()
        .iter()
        .filter(|event| matches!(event, Event::Destroy { kind: Kind::Texture, .. }))
        .count();
    assert_eq!(destroyed_textures, 1);

    let disabled = ShadowSettings {
        enabled: false,
        ..smaller
    };
    assert!(lifecycle.set_shadow_settings(&device, disabled, &mut sync)?);
    Ok(())
}

#[test]
fn test_light_grid_barriers_cover_both_buffers() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let mut sync = FrameSync::new();
    let mut lifecycle = initialized(&device);
    assert!(lifecycle.barrier_targets(FrameResource::Hdr).is_empty());

    lifecycle.recreate(&device, Extent2D::new(320, 240), &mut sync)?;
    let grid = lifecycle.barrier_targets(FrameResource::LightGrid);
    assert_eq!(grid.len(), 2);
    assert!(grid
        .iter()
        .all(|target| matches!(target, BarrierTarget::Buffer(_))));
    assert_eq!(lifecycle.barrier_targets(FrameResource::Hdr).len(), 1);
    assert_eq!(lifecycle.barrier_targets(FrameResource::ShadowAtlas).len(), 1);
    Ok(())
}

#[test]
fn test_frame_sync_waits_on_slot_reuse() -> anyhow::Result<()> {
    let device = MockDevice::new();
    let mut sync = FrameSync::new();

    let mut slots = Vec::new();
    for _ in 0..3 {
        slots.push(sync.begin_frame(&device)?);
        let encoder = device.create_command_encoder(None);
        sync.end_frame(Some(device.submit_command_buffer(encoder.finish())));
    }
    assert_eq!(slots, vec![0, 1, 0]);
    assert_eq!(
        device.events(),
        vec![
            Event::Submit(SubmissionIndex(1)),
            Event::Submit(SubmissionIndex(2)),
            Event::Wait(SubmissionIndex(1)),
            Event::Submit(SubmissionIndex(3)),
        ]
    );

    device.clear_events();
    sync.wait_all(&device)?;
    assert_eq!(
        device.events(),
        vec![
            Event::Wait(SubmissionIndex(2)),
            Event::Wait(SubmissionIndex(3)),
        ]
    );
    assert!(!sync.has_pending());
    Ok(())
}
