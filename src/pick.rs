//! Pick Metadata Encoding and Read-Back
//!
//! Every opaque pick-writing pass emits three 8-bit RGBA planes alongside
//! color: the two halves of the element identifier and a packed
//! depth+order texel. This module owns the byte-level contracts of those
//! planes and the [`PixelBuffer`] that reads rectangles of them back for
//! queries.
//!
//! # Packed depth+order texel
//!
//! | Byte | Content |
//! |------|---------|
//! | 0 | render order, normalized as `code / 16` |
//! | 1 | depth fraction, most significant base-255 digit |
//! | 2 | depth fraction, middle digit |
//! | 3 | depth fraction, least significant digit |
//!
//! Depth decodes as `b1/255 + b2/255² + b3/255³`, clamped to `[0, 1]`; the
//! greedy encoder keeps the round-trip error within `0.5/255³`. The order
//! byte decodes as `round((b0/255) * 16)`, where bit 3 of the resulting code
//! flags planar geometry.
//!
//! # Element identity
//!
//! A 64-bit identifier is carried as two little-endian 32-bit words in two
//! separate RGBA8 planes. The pair `(0, 0)` is the invalid sentinel, so the
//! planes can be cleared to zero and never-drawn pixels decode to "no
//! element".

use bitflags::bitflags;

use crate::backend::{RenderBackend, TargetKey, ViewRect};

const FRAC_1: f64 = 255.0;
const FRAC_2: f64 = 255.0 * 255.0;
const FRAC_3: f64 = 255.0 * 255.0 * 255.0;

/// Encodes a normalized depth value as a 3-digit base-255 fraction.
#[must_use]
pub fn encode_depth(depth: f32) -> [u8; 3] {
    let d = f64::from(depth).clamp(0.0, 1.0);
    let b1 = (d * FRAC_1).floor().clamp(0.0, 255.0);
    let r1 = (d - b1 / FRAC_1).max(0.0);
    let b2 = (r1 * FRAC_2).floor().clamp(0.0, 255.0);
    let r2 = (r1 - b2 / FRAC_2).max(0.0);
    let b3 = (r2 * FRAC_3).round().clamp(0.0, 255.0);
    [b1 as u8, b2 as u8, b3 as u8]
}

/// Decodes a 3-digit base-255 depth fraction.
#[must_use]
pub fn decode_depth(bytes: [u8; 3]) -> f32 {
    let d = f64::from(bytes[0]) / FRAC_1
        + f64::from(bytes[1]) / FRAC_2
        + f64::from(bytes[2]) / FRAC_3;
    d.clamp(0.0, 1.0) as f32
}

// ─── Render order ────────────────────────────────────────────────────────────

/// Base render-order code, before the planar bit.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
#[repr(u8)]
pub enum OrderKind {
    /// Nothing was drawn at this pixel.
    None = 0,
    /// Blanking region surface.
    BlankingRegion = 1,
    /// Unlit surface.
    UnlitSurface = 2,
    /// Lit surface.
    LitSurface = 3,
    /// Linear geometry (curves, line strings).
    Linear = 4,
    /// Visible edge.
    Edge = 5,
    /// Silhouette edge.
    Silhouette = 6,
}

/// Broad geometry classification reported by pixel queries.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub enum GeometryClass {
    /// Nothing, or an undecodable order value.
    None,
    /// Any surface kind, including blanking regions.
    Surface,
    /// Linear geometry.
    Linear,
    /// Visible edge.
    Edge,
    /// Silhouette edge.
    Silhouette,
}

/// Render order of the frontmost geometry at a pixel, as written into byte 0
/// of the depth+order plane.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy)]
pub struct RenderOrder {
    /// Base order code.
    pub kind: OrderKind,
    /// Whether the geometry was flagged planar.
    pub planar: bool,
}

impl RenderOrder {
    /// The never-drawn sentinel.
    pub const NONE: Self = Self {
        kind: OrderKind::None,
        planar: false,
    };

    /// Planar flag, bit 3 of the order code.
    pub const PLANAR_BIT: u8 = 1 << 3;

    /// Creates a non-planar order.
    #[inline]
    #[must_use]
    pub const fn new(kind: OrderKind) -> Self {
        Self {
            kind,
            planar: false,
        }
    }

    /// Creates a planar order.
    #[inline]
    #[must_use]
    pub const fn planar(kind: OrderKind) -> Self {
        Self { kind, planar: true }
    }

    /// The combined 4-bit order code.
    #[inline]
    #[must_use]
    pub const fn code(self) -> u8 {
        (self.kind as u8) | if self.planar { Self::PLANAR_BIT } else { 0 }
    }

    /// Encodes the order as the plane's byte-0 value, `round(code * 255 / 16)`.
    #[inline]
    #[must_use]
    pub const fn encode(self) -> u8 {
        ((self.code() as u16 * 255 + 8) / 16) as u8
    }

    /// Decodes a byte-0 value back into a render order.
    ///
    /// Codes outside the known enum range are soft decode errors: they are
    /// logged and reported as [`RenderOrder::NONE`] so the remaining pixels
    /// of a read-back stay decodable.
    #[must_use]
    pub fn decode(byte: u8) -> Self {
        let code = ((u16::from(byte) * 16 + 127) / 255) as u8;
        if code == 0 {
            return Self::NONE;
        }
        let planar = code & Self::PLANAR_BIT != 0;
        let kind = match code & !Self::PLANAR_BIT {
            1 => OrderKind::BlankingRegion,
            2 => OrderKind::UnlitSurface,
            3 => OrderKind::LitSurface,
            4 => OrderKind::Linear,
            5 => OrderKind::Edge,
            6 => OrderKind::Silhouette,
            _ => {
                log::error!("undecodable render order byte {byte} (code {code})");
                return Self::NONE;
            }
        };
        Self { kind, planar }
    }

    /// Maps the order onto the broad geometry class of pixel queries.
    #[inline]
    #[must_use]
    pub const fn geometry_class(self) -> GeometryClass {
        match self.kind {
            OrderKind::None => GeometryClass::None,
            OrderKind::BlankingRegion | OrderKind::UnlitSurface | OrderKind::LitSurface => {
                GeometryClass::Surface
            }
            OrderKind::Linear => GeometryClass::Linear,
            OrderKind::Edge => GeometryClass::Edge,
            OrderKind::Silhouette => GeometryClass::Silhouette,
        }
    }
}

// ─── Element identity ────────────────────────────────────────────────────────

/// A 64-bit element identifier, carried across two 32-bit texture planes.
#[derive(Debug, Hash, PartialEq, Eq, Clone, Copy, PartialOrd, Ord)]
pub struct ElementId(u64);

impl ElementId {
    /// Combines the two plane words, returning `None` for the `(0, 0)`
    /// invalid sentinel.
    #[inline]
    #[must_use]
    pub const fn from_halves(low: u32, high: u32) -> Option<Self> {
        if low == 0 && high == 0 {
            None
        } else {
            Some(Self((high as u64) << 32 | low as u64))
        }
    }

    /// The low 32 bits, as stored in the first ID plane.
    #[inline]
    #[must_use]
    pub const fn low(self) -> u32 {
        self.0 as u32
    }

    /// The high 32 bits, as stored in the second ID plane.
    #[inline]
    #[must_use]
    pub const fn high(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// The full identifier value.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

bitflags! {
    /// Which pick categories a query wants read back. Unrequested categories
    /// cost no GPU transfer.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PixelSelector: u8 {
        /// Element identity.
        const ELEMENT_ID = 1 << 0;
        /// Normalized distance of the frontmost geometry.
        const DISTANCE = 1 << 1;
        /// Geometry class and planarity.
        const GEOMETRY = 1 << 2;
        /// Everything.
        const ALL = Self::ELEMENT_ID.bits() | Self::DISTANCE.bits() | Self::GEOMETRY.bits();
    }
}

/// Decoded pick data of one pixel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelData {
    /// Element at the pixel, if any was drawn and identity was read.
    pub element: Option<ElementId>,
    /// Normalized distance of the frontmost geometry, `0.0` when unknown.
    pub distance_fraction: f32,
    /// Broad geometry class, [`GeometryClass::None`] when unknown.
    pub geometry: GeometryClass,
    /// Whether the frontmost geometry was planar.
    pub planar: bool,
}

impl PixelData {
    /// The invalid sentinel reported for never-drawn or out-of-rect pixels.
    pub const INVALID: Self = Self {
        element: None,
        distance_fraction: 0.0,
        geometry: GeometryClass::None,
        planar: false,
    };
}

/// The pick planes a read-back samples, as resolved by the active strategy.
#[derive(Debug, Clone, Copy)]
pub struct PickSources {
    /// Low 32 bits of the element ID, if the plane exists.
    pub element_id_low: Option<TargetKey>,
    /// High 32 bits of the element ID, if the plane exists.
    pub element_id_high: Option<TargetKey>,
    /// Packed depth+order, if the plane exists.
    pub depth_order: Option<TargetKey>,
}

// ─── Pixel buffer ────────────────────────────────────────────────────────────

/// A rectangle of pick metadata read back from the GPU.
///
/// Construction performs every transfer the selector requires, eagerly, so
/// decoding individual pixels afterwards never stalls. A transfer failure or
/// an absent source plane clears the matching selector bits instead of
/// failing the query; if nothing remains readable, [`PixelBuffer::read`]
/// returns `None`.
#[derive(Debug)]
pub struct PixelBuffer {
    rect: ViewRect,
    selector: PixelSelector,
    element_id_low: Option<Vec<u8>>,
    element_id_high: Option<Vec<u8>>,
    depth_order: Option<Vec<u8>>,
}

impl PixelBuffer {
    /// Reads the selected pick planes over `rect`.
    pub fn read<B: RenderBackend>(
        backend: &mut B,
        sources: &PickSources,
        rect: ViewRect,
        selector: PixelSelector,
    ) -> Option<Self> {
        if rect.is_empty() {
            return None;
        }

        let mut effective = selector;
        let mut element_id_low = None;
        let mut element_id_high = None;
        let mut depth_order = None;

        if effective.contains(PixelSelector::ELEMENT_ID) {
            element_id_low = read_plane(backend, sources.element_id_low, rect, "element-id-low");
            element_id_high = read_plane(backend, sources.element_id_high, rect, "element-id-high");
            if element_id_low.is_none() || element_id_high.is_none() {
                element_id_low = None;
                element_id_high = None;
                effective.remove(PixelSelector::ELEMENT_ID);
            }
        }

        if effective.intersects(PixelSelector::DISTANCE | PixelSelector::GEOMETRY) {
            depth_order = read_plane(backend, sources.depth_order, rect, "depth-order");
            if depth_order.is_none() {
                effective.remove(PixelSelector::DISTANCE | PixelSelector::GEOMETRY);
            }
        }

        if effective.is_empty() {
            return None;
        }

        Some(Self {
            rect,
            selector: effective,
            element_id_low,
            element_id_high,
            depth_order,
        })
    }

    /// The rectangle this buffer covers, in view coordinates.
    #[inline]
    #[must_use]
    pub fn rect(&self) -> ViewRect {
        self.rect
    }

    /// The categories that were actually read back.
    #[inline]
    #[must_use]
    pub fn selector(&self) -> PixelSelector {
        self.selector
    }

    /// Decodes the pixel at a view coordinate.
    ///
    /// Coordinates outside the buffer's rectangle return
    /// [`PixelData::INVALID`].
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> PixelData {
        if !self.rect.contains(x, y) {
            return PixelData::INVALID;
        }
        let offset = self.byte_offset(x, y);
        let mut data = PixelData::INVALID;

        if let (Some(low), Some(high)) = (&self.element_id_low, &self.element_id_high) {
            data.element = ElementId::from_halves(word_at(low, offset), word_at(high, offset));
        }

        if let Some(plane) = &self.depth_order {
            let texel: [u8; 4] = plane[offset..offset + 4]
                .try_into()
                .unwrap_or([0, 0, 0, 0]);
            let order = RenderOrder::decode(texel[0]);
            // A pixel nothing was drawn to is fully invalid, whatever its
            // depth bytes happen to hold.
            if order.kind != OrderKind::None {
                data.geometry = order.geometry_class();
                data.planar = order.planar;
                if self.selector.contains(PixelSelector::DISTANCE) {
                    data.distance_fraction = decode_depth([texel[1], texel[2], texel[3]]);
                }
            }
        }

        data
    }

    /// Byte offset of a view coordinate inside the bottom-up plane data.
    fn byte_offset(&self, x: u32, y: u32) -> usize {
        let col = (x - self.rect.left) as usize;
        let row_from_top = (y - self.rect.top) as usize;
        let row = self.rect.height as usize - 1 - row_from_top;
        (row * self.rect.width as usize + col) * 4
    }
}

fn read_plane<B: RenderBackend>(
    backend: &mut B,
    source: Option<TargetKey>,
    rect: ViewRect,
    label: &str,
) -> Option<Vec<u8>> {
    let key = source?;
    match backend.read_target(key, rect) {
        Ok(data) => {
            debug_assert_eq!(data.len() as u64, rect.area() * 4);
            Some(data)
        }
        Err(err) => {
            log::warn!("pick read-back of {label} failed: {err}");
            None
        }
    }
}

fn word_at(plane: &[u8], offset: usize) -> u32 {
    plane[offset..offset + 4]
        .try_into()
        .map_or(0, u32::from_le_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPTH_TOLERANCE: f64 = 1.0 / (255.0 * 255.0 * 255.0);

    #[test]
    fn test_depth_extremes() {
        assert_eq!(encode_depth(0.0), [0, 0, 0]);
        assert_eq!(encode_depth(1.0), [255, 0, 0]);
        assert_eq!(decode_depth([0, 0, 0]), 0.0);
        assert_eq!(decode_depth([255, 0, 0]), 1.0);
        // Out-of-range inputs clamp instead of wrapping.
        assert_eq!(encode_depth(-0.25), [0, 0, 0]);
        assert_eq!(encode_depth(1.75), [255, 0, 0]);
        assert_eq!(decode_depth([255, 255, 255]), 1.0);
    }

    #[test]
    fn test_depth_round_trip_near_digit_boundaries() {
        for step in 0..=255u32 {
            let depth = step as f64 / 255.0;
            for nudge in [-1e-6, 0.0, 1e-6] {
                let d = (depth + nudge).clamp(0.0, 1.0) as f32;
                let decoded = f64::from(decode_depth(encode_depth(d)));
                assert!(
                    (decoded - f64::from(d)).abs() <= DEPTH_TOLERANCE,
                    "depth {d} decoded to {decoded}"
                );
            }
        }
    }

    #[test]
    fn test_order_codes() {
        assert_eq!(RenderOrder::NONE.code(), 0);
        assert_eq!(RenderOrder::new(OrderKind::Linear).code(), 4);
        assert_eq!(RenderOrder::planar(OrderKind::Linear).code(), 12);
        assert_eq!(RenderOrder::planar(OrderKind::Silhouette).code(), 14);
    }

    #[test]
    fn test_order_byte_round_trip() {
        let kinds = [
            OrderKind::BlankingRegion,
            OrderKind::UnlitSurface,
            OrderKind::LitSurface,
            OrderKind::Linear,
            OrderKind::Edge,
            OrderKind::Silhouette,
        ];
        assert_eq!(RenderOrder::decode(RenderOrder::NONE.encode()), RenderOrder::NONE);
        for kind in kinds {
            for order in [RenderOrder::new(kind), RenderOrder::planar(kind)] {
                assert_eq!(RenderOrder::decode(order.encode()), order);
            }
        }
    }

    #[test]
    fn test_undecodable_orders_report_none() {
        // Codes 7 (unknown kind), 8 (planar bit alone) and 15 have no enum
        // counterpart; their encodings must decode to the sentinel.
        for code in [7u16, 8, 15] {
            let byte = ((code * 255 + 8) / 16) as u8;
            assert_eq!(RenderOrder::decode(byte), RenderOrder::NONE);
        }
        // A saturated byte decodes past the enum range entirely.
        assert_eq!(RenderOrder::decode(255), RenderOrder::NONE);
    }

    #[test]
    fn test_element_id_halves() {
        assert_eq!(ElementId::from_halves(0, 0), None);
        let id = ElementId::from_halves(0x1000, 0).unwrap();
        assert_eq!(id.get(), 0x1000);
        assert_eq!((id.low(), id.high()), (0x1000, 0));
        let wide = ElementId::from_halves(0xDEAD_BEEF, 0x0000_00AB).unwrap();
        assert_eq!(wide.get(), 0x0000_00AB_DEAD_BEEF);
    }
}
