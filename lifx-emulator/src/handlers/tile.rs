//! Handlers for the Tile/Matrix namespace (701-720): chain layout, per-tile framebuffer
//! read/write, the emulator-only framebuffer copy, and tile effects.

use lifx_core::{Message, TileStateDevice, HSBK};

use crate::device::DeviceState;

pub fn handle(state: &mut DeviceState, msg: &Message) -> Vec<Message> {
    match *msg {
        Message::GetDeviceChain => vec![device_chain(state)],

        Message::SetUserPosition {
            tile_index,
            user_x,
            user_y,
            ..
        } => {
            if let Some(matrix) = &mut state.matrix {
                if let Some(tile) = matrix.tiles.get_mut(tile_index as usize) {
                    tile.metadata.user_x = user_x;
                    tile.metadata.user_y = user_y;
                }
            }
            Vec::new()
        }

        Message::GetTileState64 {
            tile_index,
            length,
            framebuffer_index,
            x,
            y,
            width,
        } => get_tile_state_64_responses(state, tile_index, length, framebuffer_index, x, y, width),

        Message::SetTileState64 {
            tile_index,
            framebuffer_index,
            x,
            y,
            width,
            colors,
            ..
        } => {
            state.write_tile_rect(tile_index as usize, framebuffer_index, x, y, width, &colors);
            vec![tile_state_64(state, tile_index, framebuffer_index, x, y, width)]
        }

        Message::CopyFrameBuffer {
            tile_index,
            src_framebuffer_index,
            dst_framebuffer_index,
            x,
            y,
            width,
            height,
        } => {
            state.copy_frame_buffer(
                tile_index as usize,
                src_framebuffer_index,
                dst_framebuffer_index,
                x,
                y,
                width,
                height,
            );
            Vec::new()
        }

        Message::GetTileEffect => vec![tile_effect_state(state)],

        Message::SetTileEffect { typ, speed, duration, .. } => {
            state.set_tile_effect(typ, speed, duration);
            vec![tile_effect_state(state)]
        }

        _ => Vec::new(),
    }
}

fn device_chain(state: &DeviceState) -> Message {
    let blank = TileStateDevice {
        accel_meter_x: 0,
        accel_meter_y: 0,
        accel_meter_z: 0,
        reserved: 0,
        user_x: 0.0,
        user_y: 0.0,
        width: 0,
        height: 0,
        reserved2: 0,
        device_version_vendor: 0,
        device_version_product: 0,
        device_version_reserved: 0,
        firmware_build: 0,
        reserved3: 0,
        firmware_version_minor: 0,
        firmware_version_major: 0,
        reserved4: 0,
    };
    let mut tile_devices = [blank; 16];
    let count = state.tile_count().min(16) as usize;
    for i in 0..count {
        if let Some(meta) = state.tile_metadata(i) {
            tile_devices[i] = meta;
        }
    }
    Message::StateDeviceChain {
        start_index: 0,
        tile_devices,
        total_count: state.tile_count(),
    }
}

/// Builds the `StateTileState64` sequence for `GetTileState64`. §4.2 documents this as "StateTile64
/// for each tile in range" -- `length` tiles starting at `tile_index` -- "with ... rectangles wider
/// than 64 pixels ... split across responses." Since each response's `colors` array is a fixed
/// 64-pixel (8-row) window, a tile taller than 8 rows needs more than one response per tile to
/// cover it; this walks `y` forward by 8 rows until the tile's full height is covered.
fn get_tile_state_64_responses(
    state: &DeviceState,
    tile_index: u8,
    length: u8,
    framebuffer_index: u8,
    x: u8,
    y: u8,
    width: u8,
) -> Vec<Message> {
    let mut out = Vec::new();
    for tile in tile_index..tile_index.saturating_add(length.max(1)) {
        if state.tile_metadata(tile as usize).is_none() {
            continue;
        }
        let tile_height = state.tile_height();
        let mut row = y;
        loop {
            out.push(tile_state_64(state, tile, framebuffer_index, x, row, width));
            match row.checked_add(8) {
                Some(next) if next < tile_height => row = next,
                _ => break,
            }
        }
    }
    out
}

fn tile_state_64(
    state: &DeviceState,
    tile_index: u8,
    framebuffer_index: u8,
    x: u8,
    y: u8,
    width: u8,
) -> Message {
    let mut colors = [HSBK {
        hue: 0,
        saturation: 0,
        brightness: 0,
        kelvin: 3500,
    }; 64];
    for (i, row) in (0..8u8).enumerate() {
        let row_pixels = state.read_tile_rect(tile_index as usize, framebuffer_index, x, y.wrapping_add(row), width.min(8));
        for (j, px) in row_pixels.iter().enumerate() {
            let idx = i * 8 + j;
            if idx < colors.len() {
                colors[idx] = *px;
            }
        }
    }
    Message::StateTileState64 {
        tile_index,
        framebuffer_index,
        x,
        y,
        width,
        colors,
    }
}

fn tile_effect_state(state: &DeviceState) -> Message {
    let effect = state.tile_effect();
    Message::StateTileEffect {
        reserved: 0,
        typ: effect.typ,
        speed: effect.speed,
        duration: effect.duration_ns,
        reserved3: 0,
        reserved4: 0,
        parameters: [0u8; 32],
        palette_count: 0,
        palette: [HSBK {
            hue: 0,
            saturation: 0,
            brightness: 0,
            kelvin: 3500,
        }; 16],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSpec;
    use crate::ids::DeviceId;

    fn tile_device() -> DeviceState {
        DeviceState::create(DeviceSpec {
            vendor: 1,
            product: 55,
            id: Some(DeviceId::from_bytes([0xd0, 0x73, 0xd5, 0x00, 0x02, 0x00])),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn get_device_chain_reports_tile_count_and_dimensions() {
        let d = tile_device();
        let responses = handle(&mut d.clone(), &Message::GetDeviceChain);
        match responses.as_slice() {
            [Message::StateDeviceChain { total_count, tile_devices, .. }] => {
                assert_eq!(*total_count, 5);
                assert_eq!(tile_devices[0].width, 8);
                assert_eq!(tile_devices[0].height, 8);
            }
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn set64_then_get64_round_trips_a_rect() {
        let mut d = tile_device();
        let color = HSBK {
            hue: 42,
            saturation: 1,
            brightness: 1,
            kelvin: 3500,
        };
        let mut colors = [HSBK {
            hue: 0,
            saturation: 0,
            brightness: 0,
            kelvin: 3500,
        }; 64];
        colors[0] = color;
        handle(
            &mut d,
            &Message::SetTileState64 {
                tile_index: 0,
                length: 1,
                framebuffer_index: 0,
                x: 0,
                y: 0,
                width: 8,
                duration: 0,
                colors,
            },
        );
        let responses = handle(
            &mut d,
            &Message::GetTileState64 {
                tile_index: 0,
                length: 1,
                framebuffer_index: 0,
                x: 0,
                y: 0,
                width: 8,
            },
        );
        match responses.as_slice() {
            [Message::StateTileState64 { colors, .. }] => assert_eq!(colors[0], color),
            other => panic!("unexpected response: {other:?}"),
        }
    }

    #[test]
    fn set64_to_non_visible_buffer_does_not_affect_visible_buffer() {
        let mut d = tile_device();
        let color = HSBK {
            hue: 7,
            saturation: 1,
            brightness: 1,
            kelvin: 3500,
        };
        let mut colors = [HSBK {
            hue: 0,
            saturation: 0,
            brightness: 0,
            kelvin: 3500,
        }; 64];
        colors[0] = color;
        handle(
            &mut d,
            &Message::SetTileState64 {
                tile_index: 0,
                length: 1,
                framebuffer_index: 1,
                x: 0,
                y: 0,
                width: 8,
                duration: 0,
                colors,
            },
        );
        let visible = d.read_tile_rect(0, 0, 0, 0, 1);
        assert_ne!(visible[0], color);
        let scratch = d.read_tile_rect(0, 1, 0, 0, 1);
        assert_eq!(scratch[0], color);
    }

    #[test]
    fn copy_frame_buffer_moves_pixels_between_buffers() {
        let mut d = tile_device();
        let color = HSBK {
            hue: 55,
            saturation: 1,
            brightness: 1,
            kelvin: 3500,
        };
        d.set_color(color);

        handle(
            &mut d,
            &Message::CopyFrameBuffer {
                tile_index: 0,
                src_framebuffer_index: 0,
                dst_framebuffer_index: 2,
                x: 0,
                y: 0,
                width: 8,
                height: 8,
            },
        );
        let copied = d.read_tile_rect(0, 2, 0, 0, 8);
        assert!(copied.iter().all(|&c| c == color));
    }

    #[test]
    fn set_user_position_on_unknown_tile_is_a_no_op() {
        let mut d = tile_device();
        let responses = handle(
            &mut d,
            &Message::SetUserPosition {
                tile_index: 200,
                reserved: 0,
                user_x: 1.0,
                user_y: 2.0,
            },
        );
        assert!(responses.is_empty());
    }
}

