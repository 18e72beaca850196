//! A static binary tree of bounding rectangles, for hit-testing and for
//! finding which glyphs need redrawing.

pub use kurbo::Rect;

/// Whether two rectangles overlap with a non-empty intersection.
pub fn rects_intersect(a: &Rect, b: &Rect) -> bool {
    let (a, b) = (a.abs(), b.abs());
    a.x0 < b.x1 && b.x0 < a.x1 && a.y0 < b.y1 && b.y0 < a.y1
}

#[derive(Debug, Clone)]
enum Node<T> {
    Leaf {
        bounds: Rect,
        leaf: T,
    },
    Branch {
        bounds: Rect,
        left: Box<Node<T>>,
        right: Box<Node<T>>,
    },
}

impl<T> Node<T> {
    fn bounds(&self) -> Rect {
        match self {
            Node::Leaf { bounds, .. } | Node::Branch { bounds, .. } => *bounds,
        }
    }

    fn from_vec(mut items: Vec<(Rect, T)>) -> Option<Self> {
        match items.len() {
            0 => None,
            1 => items
                .pop()
                .map(|(bounds, leaf)| Node::Leaf { bounds, leaf }),
            n => {
                let right_items = items.split_off(n / 2);
                let left = Node::from_vec(items)?;
                let right = Node::from_vec(right_items)?;
                Some(Node::Branch {
                    bounds: left.bounds().union(right.bounds()),
                    left: Box::new(left),
                    right: Box::new(right),
                })
            }
        }
    }
}

/// A balanced, immutable tree of `(bounds, leaf)` pairs.
///
/// Interior nodes carry the union of their children's bounds, so queries only
/// descend into subtrees that can contain a hit.
#[derive(Debug, Clone)]
pub struct RectTree<T> {
    root: Option<Node<T>>,
    len: usize,
}

impl<T> Default for RectTree<T> {
    fn default() -> Self {
        RectTree { root: None, len: 0 }
    }
}

impl<T> RectTree<T> {
    /// Build a tree by median split of the input sequence.
    pub fn from_seq(items: impl IntoIterator<Item = (Rect, T)>) -> Self {
        let items: Vec<(Rect, T)> = items.into_iter().collect();
        let len = items.len();
        RectTree {
            root: Node::from_vec(items),
            len,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The union of all leaf bounds, if the tree is not empty.
    pub fn bounds(&self) -> Option<Rect> {
        self.root.as_ref().map(Node::bounds)
    }

    /// Every leaf whose bounds intersect `target`, in input order.
    pub fn iter_intersections(&self, target: Rect) -> Intersections<'_, T> {
        Intersections {
            stack: self.root.iter().collect(),
            target,
        }
    }

    /// The first leaf whose bounds intersect `target`.
    pub fn first_intersection(&self, target: Rect) -> Option<&T> {
        self.iter_intersections(target).next()
    }
}

impl<T> FromIterator<(Rect, T)> for RectTree<T> {
    fn from_iter<I: IntoIterator<Item = (Rect, T)>>(iter: I) -> Self {
        RectTree::from_seq(iter)
    }
}

pub struct Intersections<'a, T> {
    stack: Vec<&'a Node<T>>,
    target: Rect,
}

impl<'a, T> Iterator for Intersections<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            if !rects_intersect(&node.bounds(), &self.target) {
                continue;
            }
            match node {
                Node::Leaf { leaf, .. } => return Some(leaf),
                Node::Branch { left, right, .. } => {
                    self.stack.push(right);
                    self.stack.push(left);
                }
            }
        }
        None
    }
}
