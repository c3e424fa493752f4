//! Shape primitives and separating-axis overlap tests
//!
//! Every collidable entity is bounded by a circle or an axis-aligned
//! rectangle. The overlap test returns the minimum translation vector
//! that separates the first shape from the second.

use serde::{Deserialize, Serialize};

/// 2D vector / point in board pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn length_sq(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    /// Unit vector; falls back to +x for near-zero input
    pub fn normalized(self) -> Vec2 {
        let len = self.length();
        if len < 1e-6 {
            Vec2::new(1.0, 0.0)
        } else {
            Vec2::new(self.x / len, self.y / len)
        }
    }

    pub fn distance(self, other: Vec2) -> f32 {
        (self - other).length()
    }

    pub fn to_array(self) -> [f32; 2] {
        [self.x, self.y]
    }
}

impl std::ops::Add for Vec2 {
    type Output = Vec2;
    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Vec2;
    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f32> for Vec2 {
    type Output = Vec2;
    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl std::ops::Neg for Vec2 {
    type Output = Vec2;
    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

/// Circle bounding shape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Circle {
    pub center: Vec2,
    pub radius: f32,
}

impl Circle {
    pub fn new(center: Vec2, radius: f32) -> Self {
        Self { center, radius }
    }
}

/// Axis-aligned rectangle; `min` is the smallest-x, smallest-y corner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub w: f32,
    pub h: f32,
}

impl Rect {
    pub fn new(min: Vec2, w: f32, h: f32) -> Self {
        Self { min, w, h }
    }

    pub fn centered(center: Vec2, w: f32, h: f32) -> Self {
        Self {
            min: Vec2::new(center.x - w / 2.0, center.y - h / 2.0),
            w,
            h,
        }
    }

    pub fn max(&self) -> Vec2 {
        Vec2::new(self.min.x + self.w, self.min.y + self.h)
    }

    pub fn center(&self) -> Vec2 {
        Vec2::new(self.min.x + self.w / 2.0, self.min.y + self.h / 2.0)
    }
}

/// Bounding shape of a collidable entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Circle(Circle),
    Rect(Rect),
}

impl Shape {
    pub fn circle(center: Vec2, radius: f32) -> Self {
        Shape::Circle(Circle::new(center, radius))
    }

    pub fn rect(min: Vec2, w: f32, h: f32) -> Self {
        Shape::Rect(Rect::new(min, w, h))
    }

    /// Largest extent along either axis, used by the grid to cap cell fan-out
    pub fn extent(&self) -> f32 {
        match self {
            Shape::Circle(c) => c.radius * 2.0,
            Shape::Rect(r) => r.w.max(r.h),
        }
    }
}

/// Test two shapes for overlap.
///
/// Returns the minimum translation vector to add to `a`'s position so the
/// shapes no longer overlap, or `None` if they are already separated.
pub fn overlap(a: &Shape, b: &Shape) -> Option<Vec2> {
    match (a, b) {
        (Shape::Circle(ca), Shape::Circle(cb)) => circle_circle(ca, cb),
        (Shape::Circle(c), Shape::Rect(r)) => circle_rect(c, r),
        (Shape::Rect(r), Shape::Circle(c)) => circle_rect(c, r).map(|mtv| -mtv),
        (Shape::Rect(ra), Shape::Rect(rb)) => rect_rect(ra, rb),
    }
}

fn circle_circle(a: &Circle, b: &Circle) -> Option<Vec2> {
    let delta = a.center - b.center;
    let dist_sq = delta.length_sq();
    let combined = a.radius + b.radius;
    if dist_sq >= combined * combined {
        return None;
    }
    let dist = dist_sq.sqrt();
    let depth = combined - dist;
    Some(delta.normalized() * depth)
}

/// MTV that moves the circle out of the rectangle
fn circle_rect(c: &Circle, r: &Rect) -> Option<Vec2> {
    let max = r.max();
    let closest = Vec2::new(
        c.center.x.clamp(r.min.x, max.x),
        c.center.y.clamp(r.min.y, max.y),
    );
    let delta = c.center - closest;
    let dist_sq = delta.length_sq();

    if dist_sq > 1e-9 {
        // Center outside the rect: push away from the closest point
        if dist_sq >= c.radius * c.radius {
            return None;
        }
        let dist = dist_sq.sqrt();
        return Some(delta.normalized() * (c.radius - dist));
    }

    // Center inside the rect: push along the axis of least penetration
    let center = r.center();
    let dx = c.center.x - center.x;
    let dy = c.center.y - center.y;
    let px = r.w / 2.0 - dx.abs() + c.radius;
    let py = r.h / 2.0 - dy.abs() + c.radius;
    if px < py {
        Some(Vec2::new(px * sign_or_one(dx), 0.0))
    } else {
        Some(Vec2::new(0.0, py * sign_or_one(dy)))
    }
}

fn rect_rect(a: &Rect, b: &Rect) -> Option<Vec2> {
    let a_max = a.max();
    let b_max = b.max();
    let ox = a_max.x.min(b_max.x) - a.min.x.max(b.min.x);
    if ox <= 0.0 {
        return None;
    }
    let oy = a_max.y.min(b_max.y) - a.min.y.max(b.min.y);
    if oy <= 0.0 {
        return None;
    }
    let dir_x = sign_or_one(a.center().x - b.center().x);
    let dir_y = sign_or_one(a.center().y - b.center().y);
    if ox < oy {
        Some(Vec2::new(ox * dir_x, 0.0))
    } else {
        Some(Vec2::new(0.0, oy * dir_y))
    }
}

fn sign_or_one(v: f32) -> f32 {
    if v < 0.0 {
        -1.0
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f32, b: f32) {
        assert!((a - b).abs() < 1e-4, "expected {} ~ {}", a, b);
    }

    #[test]
    fn separated_circles_do_not_overlap() {
        let a = Shape::circle(Vec2::new(0.0, 0.0), 10.0);
        let b = Shape::circle(Vec2::new(25.0, 0.0), 10.0);
        assert!(overlap(&a, &b).is_none());
    }

    #[test]
    fn overlapping_circles_yield_separating_mtv() {
        let a = Shape::circle(Vec2::new(0.0, 0.0), 10.0);
        let b = Shape::circle(Vec2::new(15.0, 0.0), 10.0);
        let mtv = overlap(&a, &b).unwrap();
        assert_close(mtv.x, -5.0);
        assert_close(mtv.y, 0.0);

        // Applying the MTV separates the shapes
        let moved = Shape::circle(Vec2::new(mtv.x, mtv.y), 10.0);
        assert!(overlap(&moved, &b).is_none());
    }

    #[test]
    fn coincident_circles_still_separate() {
        let a = Shape::circle(Vec2::new(5.0, 5.0), 10.0);
        let b = Shape::circle(Vec2::new(5.0, 5.0), 10.0);
        let mtv = overlap(&a, &b).unwrap();
        assert!(mtv.length() >= 19.9);
    }

    #[test]
    fn circle_rect_pushes_circle_out() {
        let rect = Shape::rect(Vec2::new(0.0, 0.0), 50.0, 50.0);
        // Circle centered just right of the rect edge, overlapping it
        let circle = Shape::circle(Vec2::new(55.0, 25.0), 10.0);
        let mtv = overlap(&circle, &rect).unwrap();
        assert_close(mtv.x, 5.0);
        assert_close(mtv.y, 0.0);
    }

    #[test]
    fn circle_center_inside_rect_uses_least_penetration_axis() {
        let rect = Shape::rect(Vec2::new(0.0, 0.0), 50.0, 50.0);
        let circle = Shape::circle(Vec2::new(45.0, 25.0), 5.0);
        let mtv = overlap(&circle, &rect).unwrap();
        assert!(mtv.x > 0.0);
        assert_close(mtv.y, 0.0);
    }

    #[test]
    fn rect_rect_mtv_along_least_overlap_axis() {
        let a = Shape::rect(Vec2::new(0.0, 0.0), 50.0, 50.0);
        let b = Shape::rect(Vec2::new(45.0, 10.0), 50.0, 50.0);
        let mtv = overlap(&a, &b).unwrap();
        assert_close(mtv.x, -5.0);
        assert_close(mtv.y, 0.0);
    }

    #[test]
    fn touching_rects_do_not_overlap() {
        let a = Shape::rect(Vec2::new(0.0, 0.0), 50.0, 50.0);
        let b = Shape::rect(Vec2::new(50.0, 0.0), 50.0, 50.0);
        assert!(overlap(&a, &b).is_none());
    }

    #[test]
    fn mtv_is_antisymmetric_for_rect_circle_order() {
        let rect = Shape::rect(Vec2::new(0.0, 0.0), 50.0, 50.0);
        let circle = Shape::circle(Vec2::new(55.0, 25.0), 10.0);
        let forward = overlap(&circle, &rect).unwrap();
        let reverse = overlap(&rect, &circle).unwrap();
        assert_close(forward.x, -reverse.x);
        assert_close(forward.y, -reverse.y);
    }
}
