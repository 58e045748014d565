//! Canvas geometry.
//!
//! Canvas space is y-up: `top > bottom` for any non-degenerate rectangle.

use std::ops::{Add, Sub};

/// Integer 2-D vector (grid sizes, cell positions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct Vec2I {
    /// Column / width.
    pub x: i32,
    /// Row / height.
    pub y: i32,
}

impl Vec2I {
    /// Construct from components.
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Float 2-D vector (canvas points, cell sizes).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2F {
    /// Horizontal component.
    pub x: f32,
    /// Vertical component.
    pub y: f32,
}

impl Vec2F {
    /// Construct from components.
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

impl Add for Vec2F {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2F {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

/// Axis-aligned rectangle by edge positions.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    /// Upper edge (largest y).
    pub top: f32,
    /// Right edge (largest x).
    pub right: f32,
    /// Lower edge (smallest y).
    pub bottom: f32,
    /// Left edge (smallest x).
    pub left: f32,
}

impl Rect {
    /// Construct from edges.
    pub const fn new(top: f32, right: f32, bottom: f32, left: f32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
        }
    }

    /// Horizontal extent.
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    /// Vertical extent.
    pub fn height(&self) -> f32 {
        self.top - self.bottom
    }

    /// Whether `point` lies inside or on the edge.
    pub fn contains(&self, point: Vec2F) -> bool {
        point.x >= self.left && point.x <= self.right && point.y >= self.bottom && point.y <= self.top
    }

    /// Shift every edge by `delta`.
    pub fn translate(&mut self, delta: Vec2F) {
        self.top += delta.y;
        self.bottom += delta.y;
        self.left += delta.x;
        self.right += delta.x;
    }
}
