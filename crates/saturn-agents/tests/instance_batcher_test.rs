mod common;

use common::{MockDevice, CUBE};
use saturn_core::renderer::*;
use saturn_lanes::{DrawCommand, InstanceBatcher};

fn command(entity: u64) -> DrawCommand {
    DrawCommand {
        entity: EntityId(entity),
        mesh: CUBE,
        material: MaterialHandle(0),
        transform: common::transform(entity as f32),
        submesh: 0,
    }
}

#[test]
fn test_offset_resets_once_per_frame() -> anyhow::Result<()> {
    common::init_logging();
    let device = MockDevice::new();
    let assets = common::cube_assets(&device);
    let mut batcher = InstanceBatcher::new();

    for frame in 1..=3u64 {
        batcher.begin_frame(frame as usize);
        assert_eq!(batcher.packer().resets(), frame);
        assert_eq!(batcher.instance_count(), 0);

        for entity in 0..4 {
            assert!(batcher.submit(command(entity)));
        }
        batcher.flush(&device, &assets.read().unwrap())?;

        assert_eq!(batcher.packer().resets(), frame, "flush keeps the offset");
        assert_eq!(batcher.instance_count(), 4);
        assert_eq!(batcher.draws().len(), 1);
        assert_eq!(batcher.draws()[0].instances(), 0..4);
    }

    batcher.destroy(&device);
    assert_eq!(device.live(common::Kind::Buffer), 2);
    Ok(())
}
