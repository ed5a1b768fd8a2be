//! Offscreen rasterizer turning world snapshots into PNG frames.
//!
//! A pure function of snapshot, viewport, and resolution: fields are filled
//! translucent triangles, links solid lines, portals filled discs. Map
//! tiles, labels, and styling beyond the faction palette belong to other
//! tools.

use fieldlapse_core::{Faction, WorldSnapshot};
use image::{ImageBuffer, Rgba};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Cursor;
use thiserror::Error;

/// Render error wrapper.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("invalid render config: {0}")]
    InvalidConfig(&'static str),
    #[error("png encoding failed: {0}")]
    Encode(#[from] image::ImageError),
}

/// Geographic window mapped onto the output image. North is up.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

impl Viewport {
    /// Build a viewport from explicit bounds.
    pub fn new(
        min_lat: f64,
        min_lng: f64,
        max_lat: f64,
        max_lng: f64,
    ) -> Result<Self, RenderError> {
        let viewport = Self {
            min_lat,
            min_lng,
            max_lat,
            max_lng,
        };
        viewport.validate()?;
        Ok(viewport)
    }

    /// Build a viewport around a map center.
    pub fn from_center(
        lat: f64,
        lng: f64,
        lat_span: f64,
        lng_span: f64,
    ) -> Result<Self, RenderError> {
        Self::new(
            lat - lat_span / 2.0,
            lng - lng_span / 2.0,
            lat + lat_span / 2.0,
            lng + lng_span / 2.0,
        )
    }

    /// Check the bounds span a non-empty window.
    pub fn validate(&self) -> Result<(), RenderError> {
        if !(self.min_lat < self.max_lat && self.min_lng < self.max_lng) {
            return Err(RenderError::InvalidConfig(
                "viewport bounds must span a non-empty window",
            ));
        }
        if ![self.min_lat, self.min_lng, self.max_lat, self.max_lng]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(RenderError::InvalidConfig("viewport bounds must be finite"));
        }
        Ok(())
    }

    /// Map a coordinate into pixel space; `max_lat` lands on row zero.
    fn project(&self, lat: f64, lng: f64, width: u32, height: u32) -> (f32, f32) {
        let x = (lng - self.min_lng) / (self.max_lng - self.min_lng) * f64::from(width);
        let y = (self.max_lat - lat) / (self.max_lat - self.min_lat) * f64::from(height);
        (x as f32, y as f32)
    }
}

/// Resolution and viewport for emitted frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RenderConfig {
    pub width: u32,
    pub height: u32,
    pub viewport: Viewport,
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), RenderError> {
        if self.width == 0 || self.height == 0 {
            return Err(RenderError::InvalidConfig(
                "frame dimensions must be non-zero",
            ));
        }
        self.viewport.validate()
    }
}

const BACKGROUND: [u8; 4] = [16, 18, 24, 255];
const PORTAL_RADIUS: f32 = 3.0;
const FIELD_ALPHA: u8 = 64;

/// Fill color for a faction's marks.
#[must_use]
pub const fn faction_color(faction: Faction) -> [u8; 4] {
    match faction {
        Faction::Res => [0, 133, 255, 255],
        Faction::Enl => [2, 190, 2, 255],
        Faction::Neutral => [140, 140, 140, 255],
        Faction::Machina => [255, 40, 40, 255],
    }
}

type Frame = ImageBuffer<Rgba<u8>, Vec<u8>>;

/// Rasterize one snapshot into PNG bytes.
pub fn render_frame(snapshot: &WorldSnapshot, config: &RenderConfig) -> Result<Vec<u8>, RenderError> {
    config.validate()?;
    let (width, height) = (config.width, config.height);
    let mut frame = Frame::from_pixel(width, height, Rgba(BACKGROUND));

    let positions: HashMap<&str, (f32, f32)> = snapshot
        .portals
        .iter()
        .map(|portal| {
            (
                portal.id.as_str(),
                config.viewport.project(portal.lat, portal.lng, width, height),
            )
        })
        .collect();

    for field in &snapshot.fields {
        let (Some(&a), Some(&b), Some(&c)) = (
            positions.get(field.p1.as_str()),
            positions.get(field.p2.as_str()),
            positions.get(field.p3.as_str()),
        ) else {
            continue;
        };
        let mut color = faction_color(field.team);
        color[3] = FIELD_ALPHA;
        fill_triangle(&mut frame, a, b, c, color);
    }

    for link in &snapshot.links {
        let (Some(&a), Some(&b)) = (
            positions.get(link.p1.as_str()),
            positions.get(link.p2.as_str()),
        ) else {
            continue;
        };
        let team = snapshot
            .portals
            .iter()
            .find(|portal| portal.id == link.p1)
            .map_or(Faction::Neutral, |portal| portal.team);
        draw_line(&mut frame, a, b, faction_color(team));
    }

    for portal in &snapshot.portals {
        if let Some(&center) = positions.get(portal.id.as_str()) {
            draw_disc(&mut frame, center, PORTAL_RADIUS, faction_color(portal.team));
        }
    }

    let mut bytes = Vec::new();
    {
        let mut cursor = Cursor::new(&mut bytes);
        frame.write_to(&mut cursor, image::ImageFormat::Png)?;
    }
    Ok(bytes)
}

fn blend(frame: &mut Frame, x: i64, y: i64, color: [u8; 4]) {
    if x < 0 || y < 0 || x >= i64::from(frame.width()) || y >= i64::from(frame.height()) {
        return;
    }
    let pixel = frame.get_pixel_mut(x as u32, y as u32);
    let alpha = u16::from(color[3]);
    for channel in 0..3 {
        let src = u16::from(color[channel]);
        let dst = u16::from(pixel.0[channel]);
        pixel.0[channel] = ((src * alpha + dst * (255 - alpha)) / 255) as u8;
    }
    pixel.0[3] = 255;
}

fn edge(a: (f32, f32), b: (f32, f32), p: (f32, f32)) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

fn fill_triangle(frame: &mut Frame, a: (f32, f32), b: (f32, f32), c: (f32, f32), color: [u8; 4]) {
    let min_x = a.0.min(b.0).min(c.0).floor().max(0.0) as i64;
    let max_x = (a.0.max(b.0).max(c.0).ceil() as i64).min(i64::from(frame.width()) - 1);
    let min_y = a.1.min(b.1).min(c.1).floor().max(0.0) as i64;
    let max_y = (a.1.max(b.1).max(c.1).ceil() as i64).min(i64::from(frame.height()) - 1);
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            let p = (x as f32 + 0.5, y as f32 + 0.5);
            let e1 = edge(a, b, p);
            let e2 = edge(b, c, p);
            let e3 = edge(c, a, p);
            let inside = (e1 >= 0.0 && e2 >= 0.0 && e3 >= 0.0)
                || (e1 <= 0.0 && e2 <= 0.0 && e3 <= 0.0);
            if inside {
                blend(frame, x, y, color);
            }
        }
    }
}

fn draw_line(frame: &mut Frame, a: (f32, f32), b: (f32, f32), color: [u8; 4]) {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    let steps = dx.abs().max(dy.abs()).ceil().max(1.0) as i64;
    for step in 0..=steps {
        let t = step as f32 / steps as f32;
        let x = (a.0 + dx * t).round() as i64;
        let y = (a.1 + dy * t).round() as i64;
        blend(frame, x, y, color);
    }
}

fn draw_disc(frame: &mut Frame, center: (f32, f32), radius: f32, color: [u8; 4]) {
    let span = radius.ceil() as i64;
    let cx = center.0.round() as i64;
    let cy = center.1.round() as i64;
    for dy in -span..=span {
        for dx in -span..=span {
            let dist = ((dx as f32).powi(2) + (dy as f32).powi(2)).sqrt();
            if dist <= radius {
                blend(frame, cx + dx, cy + dy, color);
            }
        }
    }
}
