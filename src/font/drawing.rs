//! Glyph outlines as `kurbo` paths, from compiled fonts and from UFO glyphs.

use kurbo::{Affine, BezPath, PathEl, Point, Rect, Shape};
use rustybuzz::ttf_parser;

/// Components nested deeper than this are dropped.
const MAX_COMPONENT_DEPTH: usize = 32;

/// One layer of a glyph drawing.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawingLayer {
    pub path: BezPath,
    /// Index into the active color palette; `None` draws in the foreground
    /// color.
    pub palette_index: Option<u16>,
}

/// The outline of a glyph, possibly made of color layers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GlyphDrawing {
    pub layers: Vec<DrawingLayer>,
}

impl GlyphDrawing {
    pub fn new(path: BezPath) -> Self {
        GlyphDrawing {
            layers: vec![DrawingLayer {
                path,
                palette_index: None,
            }],
        }
    }

    pub fn is_color(&self) -> bool {
        self.layers.iter().any(|l| l.palette_index.is_some())
    }

    /// All layers merged into one path.
    pub fn path(&self) -> BezPath {
        let mut path = BezPath::new();
        for layer in &self.layers {
            path.extend(layer.path.iter());
        }
        path
    }

    /// Union of the layer bounds; `None` for an empty drawing.
    pub fn bounds(&self) -> Option<Rect> {
        self.layers
            .iter()
            .filter(|l| !l.path.elements().is_empty())
            .map(|l| l.path.bounding_box())
            .reduce(|a, b| a.union(b))
    }
}

#[derive(Default)]
struct PathBuilder(BezPath);

impl ttf_parser::OutlineBuilder for PathBuilder {
    fn move_to(&mut self, x: f32, y: f32) {
        self.0.move_to((x as f64, y as f64));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.0.line_to((x as f64, y as f64));
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.0.quad_to((x1 as f64, y1 as f64), (x as f64, y as f64));
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.0.curve_to(
            (x1 as f64, y1 as f64),
            (x2 as f64, y2 as f64),
            (x as f64, y as f64),
        );
    }

    fn close(&mut self) {
        self.0.close_path();
    }
}

/// The outline of `gid` in a compiled font, at the face's variation location.
pub(crate) fn sfnt_outline(face: &ttf_parser::Face<'_>, gid: u16) -> BezPath {
    let mut builder = PathBuilder::default();
    face.outline_glyph(ttf_parser::GlyphId(gid), &mut builder);
    builder.0
}

fn point(p: &norad::ContourPoint) -> Point {
    Point::new(p.x, p.y)
}

fn is_on_curve(p: &norad::ContourPoint) -> bool {
    !matches!(p.typ, norad::PointType::OffCurve)
}

fn flush_quads(path: &mut BezPath, off_curves: &[Point], end: Point) {
    let Some((last, rest)) = off_curves.split_last() else {
        path.line_to(end);
        return;
    };
    let mut previous: Option<Point> = None;
    for &p in rest {
        if let Some(prev) = previous {
            path.quad_to(prev, prev.midpoint(p));
        }
        previous = Some(p);
    }
    if let Some(prev) = previous {
        path.quad_to(prev, prev.midpoint(*last));
    }
    path.quad_to(*last, end);
}

/// Draw one UFO contour into `path`.
pub(crate) fn draw_contour(path: &mut BezPath, contour: &norad::Contour) {
    let points = &contour.points;
    let Some(first) = points.first() else {
        return;
    };
    let closed = first.typ != norad::PointType::Move;
    let mut ordered: Vec<&norad::ContourPoint> = points.iter().collect();

    if closed {
        match ordered.iter().position(|p| is_on_curve(p)) {
            // The on-curve point moves to the end; the contour starts there.
            Some(index) => ordered.rotate_left(index + 1),
            None => {
                // All off-curve: a quadratic loop with implied on-curve points
                let offs: Vec<Point> = ordered.iter().map(|p| point(p)).collect();
                let (Some(&first), Some(&last)) = (offs.first(), offs.last()) else {
                    return;
                };
                let start = last.midpoint(first);
                path.move_to(start);
                flush_quads(path, &offs, start);
                path.close_path();
                return;
            }
        }
    }

    let (start, rest) = match ordered.split_last() {
        Some((last, init)) if closed => (point(last), init.to_vec()),
        _ => (point(first), ordered[1..].to_vec()),
    };
    path.move_to(start);
    let mut off_curves: Vec<Point> = vec![];
    for p in rest.iter().copied().chain(closed.then_some(ordered[ordered.len() - 1])) {
        let pt = point(p);
        match p.typ {
            norad::PointType::OffCurve => off_curves.push(pt),
            norad::PointType::Move | norad::PointType::Line => {
                path.line_to(pt);
                off_curves.clear();
            }
            norad::PointType::Curve => {
                match off_curves.as_slice() {
                    [] => path.line_to(pt),
                    [c] => path.quad_to(*c, pt),
                    [c1, .., c2] => path.curve_to(*c1, *c2, pt),
                }
                off_curves.clear();
            }
            norad::PointType::QCurve => {
                flush_quads(path, &off_curves, pt);
                off_curves.clear();
            }
        }
    }
    if closed {
        path.close_path();
    }
}

/// A UFO glyph's outline with its components decomposed through `layer`.
pub(crate) fn ufo_outline(layer: &norad::Layer, glyph: &norad::Glyph) -> BezPath {
    let mut path = BezPath::new();
    append_ufo_glyph(&mut path, layer, glyph, Affine::IDENTITY, 0);
    path
}

fn append_ufo_glyph(
    path: &mut BezPath,
    layer: &norad::Layer,
    glyph: &norad::Glyph,
    transform: Affine,
    depth: usize,
) {
    let mut own = BezPath::new();
    for contour in &glyph.contours {
        draw_contour(&mut own, contour);
    }
    own.apply_affine(transform);
    path.extend(own.iter());
    if depth >= MAX_COMPONENT_DEPTH {
        log::warn!("Components of {} nest too deeply", glyph.name());
        return;
    }
    for component in &glyph.components {
        let Some(base) = layer.get_glyph(component.base.as_str()) else {
            log::debug!("{} references missing glyph {}", glyph.name(), component.base);
            continue;
        };
        let t = component.transform;
        let local = Affine::new([
            t.x_scale, t.xy_scale, t.yx_scale, t.y_scale, t.x_offset, t.y_offset,
        ]);
        append_ufo_glyph(path, layer, base, transform * local, depth + 1);
    }
}

/// A box outline used for `.notdef` glyphs that a source does not define.
pub(crate) fn notdef_box(width: f64, ascender: f64, descender: f64, stroke: f64) -> BezPath {
    let mut path = BezPath::new();
    let outer = Rect::new(stroke, descender, width - stroke, ascender);
    let inner = outer.inset(-stroke);
    path.extend(outer.path_elements(0.1));
    // Counter runs the other way
    let (x0, y0, x1, y1) = (inner.x0, inner.y0, inner.x1, inner.y1);
    path.move_to((x0, y0));
    path.line_to((x0, y1));
    path.line_to((x1, y1));
    path.line_to((x1, y0));
    path.close_path();
    path
}

/// The element kinds of a path, used to check that outlines interpolate.
pub(crate) fn signature(path: &BezPath) -> Vec<u8> {
    path.elements()
        .iter()
        .map(|el| match el {
            PathEl::MoveTo(_) => 0,
            PathEl::LineTo(_) => 1,
            PathEl::QuadTo(..) => 2,
            PathEl::CurveTo(..) => 3,
            PathEl::ClosePath => 4,
        })
        .collect()
}

pub(crate) fn to_coordinate_list(path: &BezPath) -> Vec<f64> {
    let mut coords = vec![];
    for el in path.elements() {
        let points: &[Point] = match el {
            PathEl::MoveTo(p) | PathEl::LineTo(p) => std::slice::from_ref(p),
            PathEl::QuadTo(a, b) => &[*a, *b],
            PathEl::CurveTo(a, b, c) => &[*a, *b, *c],
            PathEl::ClosePath => &[],
        };
        for p in points {
            coords.push(p.x);
            coords.push(p.y);
        }
    }
    coords
}

/// Rebuild a path with the element kinds of `template` from a flat
/// coordinate list.
pub(crate) fn from_coordinate_list(template: &BezPath, coords: &[f64]) -> BezPath {
    let mut points = coords.chunks_exact(2).map(|c| Point::new(c[0], c[1]));
    let mut next = || points.next().unwrap_or_default();
    let mut path = BezPath::new();
    for el in template.elements() {
        match el {
            PathEl::MoveTo(_) => path.move_to(next()),
            PathEl::LineTo(_) => path.line_to(next()),
            PathEl::QuadTo(..) => {
                let a = next();
                path.quad_to(a, next());
            }
            PathEl::CurveTo(..) => {
                let (a, b) = (next(), next());
                path.curve_to(a, b, next());
            }
            PathEl::ClosePath => path.close_path(),
        }
    }
    path
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use pretty_assertions::assert_eq;

    fn pt(x: f64, y: f64, typ: norad::PointType) -> norad::ContourPoint {
        norad::ContourPoint::new(x, y, typ, false, None, None)
    }

    #[test]
    fn closed_contour_starts_at_first_on_curve() {
        use norad::PointType::*;
        let contour = norad::Contour::new(
            vec![
                pt(0.0, 0.0, Line),
                pt(0.0, 100.0, Line),
                pt(100.0, 100.0, Line),
            ],
            None,
        );
        let mut path = BezPath::new();
        draw_contour(&mut path, &contour);
        assert_eq!(
            path.elements(),
            &[
                PathEl::MoveTo(Point::new(0.0, 0.0)),
                PathEl::LineTo(Point::new(0.0, 100.0)),
                PathEl::LineTo(Point::new(100.0, 100.0)),
                PathEl::LineTo(Point::new(0.0, 0.0)),
                PathEl::ClosePath,
            ]
        );
    }

    #[test]
    fn cubic_and_open_contours() {
        use norad::PointType::*;
        let contour = norad::Contour::new(
            vec![
                pt(0.0, 0.0, Move),
                pt(10.0, 50.0, OffCurve),
                pt(40.0, 50.0, OffCurve),
                pt(50.0, 0.0, Curve),
            ],
            None,
        );
        let mut path = BezPath::new();
        draw_contour(&mut path, &contour);
        assert_eq!(signature(&path), vec![0, 3]);
    }

    #[test]
    fn implied_quadratic_on_curves() {
        use norad::PointType::*;
        let contour = norad::Contour::new(
            vec![
                pt(0.0, 0.0, QCurve),
                pt(0.0, 100.0, OffCurve),
                pt(100.0, 100.0, OffCurve),
                pt(100.0, 0.0, QCurve),
            ],
            None,
        );
        let mut path = BezPath::new();
        draw_contour(&mut path, &contour);
        assert_eq!(signature(&path), vec![0, 2, 2, 1, 4]);
        assert_eq!(
            path.elements()[1],
            PathEl::QuadTo(Point::new(0.0, 100.0), Point::new(50.0, 100.0))
        );
    }

    #[test]
    fn coordinate_lists_rebuild_paths() {
        let mut path = BezPath::new();
        path.move_to((0.0, 0.0));
        path.quad_to((1.0, 2.0), (3.0, 4.0));
        path.close_path();
        let coords = to_coordinate_list(&path);
        assert_eq!(coords, vec![0.0, 0.0, 1.0, 2.0, 3.0, 4.0]);
        let doubled: Vec<f64> = coords.iter().map(|c| c * 2.0).collect();
        let rebuilt = from_coordinate_list(&path, &doubled);
        assert_eq!(signature(&rebuilt), signature(&path));
        assert_eq!(rebuilt.elements()[1], PathEl::QuadTo(Point::new(2.0, 4.0), Point::new(6.0, 8.0)));
    }

    #[test]
    fn drawing_bounds() {
        let drawing = GlyphDrawing::new(notdef_box(500.0, 800.0, -200.0, 50.0));
        assert_eq!(drawing.bounds(), Some(Rect::new(50.0, -200.0, 450.0, 800.0)));
        assert!(!drawing.is_color());
        assert_eq!(GlyphDrawing::default().bounds(), None);
    }
}
