//! Mapping summary report: per-route outcomes accumulated during the
//! commit phase. Fatal errors never reach this type — only the two
//! recoverable failure kinds do.

use std::fmt;

use crate::ids::{LineId, LinkId, RouteId};
use crate::model::TransitSchedule;

/// Why a route could not be mapped. Recoverable: the route is simply
/// excluded from the mapped output and the batch continues.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnmappableReason {
    /// At least one stop had no candidate link at all (radius cap exhausted,
    /// artificial links disabled).
    NoCandidates,
    /// The pseudo-graph's SINK was unreachable from SOURCE.
    NoPath,
    /// The per-route wall-clock budget elapsed before solving finished.
    Timeout,
    /// The mapped route's link sequence is shorter than the great-circle
    /// distance between its first and last stop minus the configured slack.
    GreatCircleInfeasible,
}

impl fmt::Display for UnmappableReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoCandidates => "no stop in the route had a link candidate",
            Self::NoPath => "no path from SOURCE to SINK in the pseudo-graph",
            Self::Timeout => "per-route timeout elapsed",
            Self::GreatCircleInfeasible => {
                "mapped link sequence is shorter than the great-circle distance between its endpoints"
            }
        };
        f.write_str(text)
    }
}

/// Outcome of mapping one batch: counts of mapped/unmapped routes, the
/// reason for each unmapped route, and every artificial link the candidate
/// generator emitted (whether or not the finalizer ultimately kept it).
#[derive(Clone, Debug, Default)]
pub struct MappingReport {
    mapped: Vec<(LineId, RouteId)>,
    unmapped: Vec<(LineId, RouteId, UnmappableReason)>,
    artificial_links: Vec<LinkId>,
}

impl MappingReport {
    pub(crate) fn record_mapped(&mut self, line: LineId, route: RouteId) {
        self.mapped.push((line, route));
    }

    pub(crate) fn record_unmapped(&mut self, line: LineId, route: RouteId, reason: UnmappableReason) {
        self.unmapped.push((line, route, reason));
    }

    pub(crate) fn record_artificial_link(&mut self, link: LinkId) {
        self.artificial_links.push(link);
    }

    #[must_use]
    pub fn mapped(&self) -> &[(LineId, RouteId)] {
        &self.mapped
    }

    #[must_use]
    pub fn unmapped(&self) -> &[(LineId, RouteId, UnmappableReason)] {
        &self.unmapped
    }

    #[must_use]
    pub fn artificial_links(&self) -> &[LinkId] {
        &self.artificial_links
    }

    #[must_use]
    pub fn mapped_count(&self) -> usize {
        self.mapped.len()
    }

    #[must_use]
    pub fn unmapped_count(&self) -> usize {
        self.unmapped.len()
    }

    /// Human-readable summary for CLI/log output, resolving interned ids
    /// back to their original string form.
    #[must_use]
    pub fn summary(&self, schedule: &TransitSchedule) -> String {
        let mut out = format!(
            "mapped {} route(s), {} unmapped, {} artificial link(s) emitted\n",
            self.mapped_count(),
            self.unmapped_count(),
            self.artificial_links.len()
        );
        for (line, route, reason) in &self.unmapped {
            out.push_str(&format!(
                "  unmapped: line {:?} route {:?}: {}\n",
                schedule.line_interner().resolve(*line),
                schedule.route_interner().resolve(*route),
                reason
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_lists_unmapped_reasons() {
        let schedule = TransitSchedule::new();
        let mut report = MappingReport::default();
        report.record_unmapped(LineId::from_raw(0), RouteId::from_raw(0), UnmappableReason::NoPath);
        let summary = report.summary(&schedule);
        assert!(summary.contains("1 unmapped"));
        assert!(summary.contains("no path from SOURCE to SINK"));
    }
}
