//! Rule evaluation over flattened geometry.
//!
//! The checker only talks to rules through [`RuleEvaluator`]. [`RuleDeck`]
//! is the stock implementation: a small Manhattan rule set loaded from JSON.

use opensilicon_core::geometry::{self, Rect};
use opensilicon_core::{LayerId, LayerMask, RuleRef, TilePlane};
use serde::{Deserialize, Serialize};

use crate::error::DrcError;
use crate::flatten::FlatPaint;

/// One violation reported by a rule evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RuleHit {
    pub rule: RuleRef,
    pub rect: Rect,
}

/// The contract between the checker and the rule engine.
pub trait RuleEvaluator {
    /// Check the geometry of `flat` inside `work` and return violations
    /// clipped to `contain`. Must not depend on anything but its arguments.
    fn evaluate(&self, flat: &TilePlane<FlatPaint>, work: Rect, contain: Rect) -> Vec<RuleHit>;

    /// Largest distance across which any rule relates two pieces of geometry.
    fn max_distance(&self) -> i64;

    /// Layers that must either not overlap across placements or overlap
    /// exactly.
    fn exact_overlap_layers(&self) -> LayerMask;

    /// Layers that may not sit under an exact-overlap layer drawn elsewhere.
    fn conflicting_layers(&self, layer: LayerId) -> LayerMask;

    /// Human-readable explanation of a rule.
    fn describe(&self, rule: RuleRef) -> String;
}

/// A single declarative rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Rule {
    /// Every horizontal and vertical run of the layer is at least `width`.
    MinWidth { layer: LayerId, width: i64 },
    /// Gaps between pieces of the layer, measured along x and y, are at
    /// least `spacing`.
    MinSpacing { layer: LayerId, spacing: i64 },
    /// The layer may not be drawn on top of itself by two sources.
    NoOverlap { layer: LayerId },
    /// The two layers may never overlap.
    Exclude { a: LayerId, b: LayerId },
}

impl Rule {
    fn distance(&self) -> i64 {
        match self {
            Rule::MinWidth { width, .. } => *width,
            Rule::MinSpacing { spacing, .. } => *spacing,
            Rule::NoOverlap { .. } | Rule::Exclude { .. } => 0,
        }
    }

    fn layers(&self) -> Vec<LayerId> {
        match self {
            Rule::MinWidth { layer, .. } | Rule::MinSpacing { layer, .. } | Rule::NoOverlap { layer } => {
                vec![*layer]
            }
            Rule::Exclude { a, b } => vec![*a, *b],
        }
    }
}

/// An exact-overlap declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExactOverlap {
    pub layer: LayerId,
    #[serde(default)]
    pub conflicts: Vec<LayerId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleDeck {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default)]
    pub exact_overlap: Vec<ExactOverlap>,
}

impl RuleDeck {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn with_exact_overlap(mut self, layer: LayerId, conflicts: &[LayerId]) -> Self {
        self.exact_overlap.push(ExactOverlap {
            layer,
            conflicts: conflicts.to_vec(),
        });
        self
    }

    pub fn from_json(json: &str) -> Result<Self, DrcError> {
        let deck: RuleDeck = serde_json::from_str(json)?;
        deck.validate()?;
        Ok(deck)
    }

    pub fn validate(&self) -> Result<(), DrcError> {
        for (index, rule) in self.rules.iter().enumerate() {
            if rule.distance() < 0 {
                return Err(DrcError::InvalidRule {
                    index,
                    message: "distance must not be negative".to_string(),
                });
            }
            if let Some(layer) = rule.layers().into_iter().find(|l| *l >= LayerMask::CAPACITY) {
                return Err(DrcError::InvalidRule {
                    index,
                    message: format!("layer {} is out of range", layer),
                });
            }
        }
        Ok(())
    }

    fn rule(&self, rule: RuleRef) -> Option<&Rule> {
        if rule.is_builtin() {
            return None;
        }
        self.rules.get(rule.0 as usize)
    }
}

impl RuleEvaluator for RuleDeck {
    fn evaluate(&self, flat: &TilePlane<FlatPaint>, work: Rect, contain: Rect) -> Vec<RuleHit> {
        let mut hits = Vec::new();
        for (index, rule) in self.rules.iter().enumerate() {
            let rule_ref = RuleRef(index as u32);
            let found = match rule {
                Rule::MinWidth { layer, width } => {
                    let shapes = layer_rects(flat, work, |p| p.layers.contains(*layer));
                    runs_in_both_directions(&shapes, |bands| short_runs(bands, *width))
                }
                Rule::MinSpacing { layer, spacing } => {
                    let shapes = layer_rects(flat, work, |p| p.layers.contains(*layer));
                    runs_in_both_directions(&shapes, |bands| short_gaps(bands, *spacing))
                }
                Rule::NoOverlap { layer } => layer_rects(flat, work, |p| p.stacked.contains(*layer)),
                Rule::Exclude { a, b } => layer_rects(flat, work, |p| p.layers.contains(*a) && p.layers.contains(*b)),
            };
            let clipped: Vec<Rect> = found.iter().filter_map(|r| r.intersection(&contain)).collect();
            hits.extend(
                geometry::maximal_strips(&clipped)
                    .into_iter()
                    .map(|rect| RuleHit { rule: rule_ref, rect }),
            );
        }
        hits.sort();
        hits
    }

    fn max_distance(&self) -> i64 {
        let rules = self.rules.iter().map(Rule::distance).max().unwrap_or(0);
        // Exact-overlap checks look one unit past each tile.
        let exact = if self.exact_overlap.is_empty() { 0 } else { 1 };
        rules.max(exact)
    }

    fn exact_overlap_layers(&self) -> LayerMask {
        LayerMask::from_layers(self.exact_overlap.iter().map(|e| e.layer))
    }

    fn conflicting_layers(&self, layer: LayerId) -> LayerMask {
        self.exact_overlap
            .iter()
            .filter(|e| e.layer == layer)
            .fold(LayerMask::EMPTY, |acc, e| acc | LayerMask::from_layers(e.conflicts.iter().copied()))
    }

    fn describe(&self, rule: RuleRef) -> String {
        if rule == RuleRef::SUBCELL_OVERLAP {
            return "Overlapping subcells do not match exactly".to_string();
        }
        if rule == RuleRef::ARRAY_OVERLAP {
            return "Overlapping array elements do not match exactly".to_string();
        }
        match self.rule(rule) {
            Some(Rule::MinWidth { layer, width }) => format!("Layer {} width < {}", layer, width),
            Some(Rule::MinSpacing { layer, spacing }) => format!("Layer {} spacing < {}", layer, spacing),
            Some(Rule::NoOverlap { layer }) => format!("Layer {} may not overlap itself", layer),
            Some(Rule::Exclude { a, b }) => format!("Layers {} and {} may not overlap", a, b),
            None => format!("Unknown rule {}", rule.0),
        }
    }
}

/// Pieces of flat tiles inside `work` matching `pred`.
fn layer_rects<P>(flat: &TilePlane<FlatPaint>, work: Rect, pred: P) -> Vec<Rect>
where
    P: Fn(&FlatPaint) -> bool,
{
    flat.search(work)
        .filter(|t| pred(&t.value))
        .filter_map(|t| t.rect.intersection(&work))
        .collect()
}

/// One elementary horizontal band: `[y0, y1)` and the merged x spans in it.
struct Band {
    y0: i64,
    y1: i64,
    spans: Vec<(i64, i64)>,
}

fn bands(rects: &[Rect]) -> Vec<Band> {
    let mut ys: Vec<i64> = rects.iter().flat_map(|r| [r.ymin, r.ymax]).collect();
    ys.sort_unstable();
    ys.dedup();
    ys.windows(2)
        .map(|w| {
            let (y0, y1) = (w[0], w[1]);
            let mut spans: Vec<(i64, i64)> = rects
                .iter()
                .filter(|r| r.ymin <= y0 && r.ymax >= y1)
                .map(|r| (r.xmin, r.xmax))
                .collect();
            spans.sort_unstable();
            let mut merged: Vec<(i64, i64)> = Vec::with_capacity(spans.len());
            for (x0, x1) in spans {
                match merged.last_mut() {
                    Some(last) if x0 <= last.1 => last.1 = last.1.max(x1),
                    _ => merged.push((x0, x1)),
                }
            }
            Band { y0, y1, spans: merged }
        })
        .collect()
}

fn short_runs(bands: &[Band], min: i64) -> Vec<Rect> {
    bands
        .iter()
        .flat_map(|b| {
            b.spans
                .iter()
                .filter(move |(x0, x1)| x1 - x0 < min)
                .map(move |(x0, x1)| Rect::new(*x0, b.y0, *x1, b.y1))
        })
        .collect()
}

fn short_gaps(bands: &[Band], min: i64) -> Vec<Rect> {
    bands
        .iter()
        .flat_map(|b| {
            b.spans
                .windows(2)
                .filter(move |w| w[1].0 - w[0].1 < min)
                .map(move |w| Rect::new(w[0].1, b.y0, w[1].0, b.y1))
        })
        .collect()
}

/// Apply a band measurement along x, then along y via transposition.
fn runs_in_both_directions<F>(shapes: &[Rect], measure: F) -> Vec<Rect>
where
    F: Fn(&[Band]) -> Vec<Rect>,
{
    let mut out = measure(&bands(shapes));
    let transposed: Vec<Rect> = shapes.iter().map(Rect::transposed).collect();
    out.extend(measure(&bands(&transposed)).iter().map(Rect::transposed));
    out
}
