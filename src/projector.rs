//! Turns index query output into renderable marker specs.
//!
//! Leaves get a visual derived from their location's category through a
//! fixed table; clusters get a count badge. Projection is a pure function of
//! its inputs.

use log::warn;

use crate::index::ClusterNode;
use crate::{Catalogue, Category, MapError};

/// Badge size tier for a cluster marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BadgeSize {
    Small,
    Medium,
    Large,
}

impl BadgeSize {
    pub fn for_count(count: u32) -> Self {
        match count {
            0..=9 => BadgeSize::Small,
            10..=49 => BadgeSize::Medium,
            _ => BadgeSize::Large,
        }
    }

    /// Badge diameter in pixels.
    pub fn diameter_px(&self) -> u32 {
        match self {
            BadgeSize::Small => 30,
            BadgeSize::Medium => 40,
            BadgeSize::Large => 50,
        }
    }
}

/// What the renderer draws for a marker.
#[derive(Debug, Clone, PartialEq)]
pub enum MarkerVisual {
    /// A single location, styled by category.
    Location {
        category: Category,
        color: &'static str,
        glyph: &'static str,
        /// Shown when the glyph cannot be drawn
        initials: String,
    },
    /// A count badge for a cluster.
    Cluster {
        label: String,
        size: BadgeSize,
        color: &'static str,
    },
    /// The viewer's live position.
    UserPosition,
    /// A one-shot location received through a share link.
    SharedLocation,
}

/// A node paired with its visual.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSpec {
    pub node: ClusterNode,
    pub visual: MarkerVisual,
}

impl RenderSpec {
    pub fn key(&self) -> String {
        self.node.key()
    }
}

struct CategoryStyle {
    color: &'static str,
    glyph: &'static str,
}

const NEUTRAL_STYLE: CategoryStyle = CategoryStyle { color: "#6b7280", glyph: "map-pin" };

fn category_style(category: Category) -> Option<CategoryStyle> {
    let style = match category {
        Category::Academic => CategoryStyle { color: "#2563eb", glyph: "graduation-cap" },
        Category::StudentServices => CategoryStyle { color: "#7c3aed", glyph: "users" },
        Category::Dining => CategoryStyle { color: "#ea580c", glyph: "utensils" },
        Category::Housing => CategoryStyle { color: "#16a34a", glyph: "home" },
        Category::Recreation => CategoryStyle { color: "#0891b2", glyph: "dumbbell" },
        Category::Administrative => CategoryStyle { color: "#475569", glyph: "building" },
        Category::Services => CategoryStyle { color: "#db2777", glyph: "wrench" },
        Category::Unknown => return None,
    };
    Some(style)
}

/// Up to two leading letters of the name's words, uppercased.
pub fn initials(name: &str) -> String {
    let out: String = name
        .split_whitespace()
        .filter_map(|word| word.chars().find(|c| c.is_alphanumeric()))
        .take(2)
        .flat_map(char::to_uppercase)
        .collect();

    if out.is_empty() {
        "?".to_string()
    } else {
        out
    }
}

fn count_label(count: u32) -> String {
    if count < 1000 {
        count.to_string()
    } else {
        format!("{:.1}k", count as f64 / 1000.0)
    }
}

fn cluster_color(size: BadgeSize) -> &'static str {
    match size {
        BadgeSize::Small => "#3b82f6",
        BadgeSize::Medium => "#f59e0b",
        BadgeSize::Large => "#ef4444",
    }
}

/// Projects cluster nodes into render specs.
#[derive(Debug, Clone)]
pub struct ClusterProjector {
    /// Fail on unknown categories or locations instead of drawing a neutral
    /// marker. On by default in debug builds.
    pub strict: bool,
}

impl Default for ClusterProjector {
    fn default() -> Self {
        Self { strict: cfg!(debug_assertions) }
    }
}

impl ClusterProjector {
    pub fn new(strict: bool) -> Self {
        Self { strict }
    }

    pub fn project(&self, nodes: &[ClusterNode], catalogue: &Catalogue) -> Result<Vec<RenderSpec>, MapError> {
        nodes
            .iter()
            .map(|node| {
                let visual = self.visual_for(node, catalogue)?;
                Ok(RenderSpec { node: node.clone(), visual })
            })
            .collect()
    }

    fn visual_for(&self, node: &ClusterNode, catalogue: &Catalogue) -> Result<MarkerVisual, MapError> {
        match node {
            ClusterNode::Cluster { point_count, .. } => {
                let size = BadgeSize::for_count(*point_count);
                Ok(MarkerVisual::Cluster {
                    label: count_label(*point_count),
                    size,
                    color: cluster_color(size),
                })
            }
            ClusterNode::Leaf { location_id, .. } => {
                let Some(location) = catalogue.get(location_id) else {
                    if self.strict {
                        return Err(MapError::UnknownLocation(location_id.clone()));
                    }
                    warn!("[ClusterProjector] Leaf {} not in catalogue, drawing neutral marker", location_id);
                    return Ok(neutral_visual(Category::Unknown, location_id));
                };

                match category_style(location.category) {
                    Some(style) => Ok(MarkerVisual::Location {
                        category: location.category,
                        color: style.color,
                        glyph: style.glyph,
                        initials: initials(&location.name),
                    }),
                    None if self.strict => Err(MapError::UnknownCategory { id: location.id.clone() }),
                    None => {
                        warn!(
                            "[ClusterProjector] Location {} has unknown category, drawing neutral marker",
                            location.id
                        );
                        Ok(neutral_visual(location.category, &location.name))
                    }
                }
            }
        }
    }
}

fn neutral_visual(category: Category, name: &str) -> MarkerVisual {
    MarkerVisual::Location {
        category,
        color: NEUTRAL_STYLE.color,
        glyph: NEUTRAL_STYLE.glyph,
        initials: initials(name),
    }
}
