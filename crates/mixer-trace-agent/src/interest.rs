// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Decides whether an instance touches the monitored namespaces, and whether this particular
//! proxy report of the call is the one to act on.
//!
//! Every call between two meshed workloads is reported twice: once by the source's outbound
//! proxy and once by the destination's inbound proxy. Only one of the two reports is actionable.

use tracing::trace;

const UNKNOWN_VALUE: &str = "unknown";

/// Namespaces the adapter monitors. An empty target list means every namespace.
#[derive(Debug, Clone, Default)]
pub struct NamespaceFilter {
    pub target_namespaces: Vec<String>,
    pub ignored_namespaces: Vec<String>,
}

/// One side of a call: its namespace and the value of its monitoring opt-in label.
#[derive(Debug, Clone, Copy)]
pub struct Workload<'a> {
    pub namespace: &'a str,
    pub opt_in: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub is_interesting: bool,
    pub is_fully_within_target: bool,
    pub is_source_within_target: bool,
    pub is_destination_within_target: bool,
}

impl NamespaceFilter {
    pub fn new(target_namespaces: Vec<String>, ignored_namespaces: Vec<String>) -> Self {
        NamespaceFilter {
            target_namespaces,
            ignored_namespaces,
        }
    }

    pub fn classify(&self, reporter_uid: &str, source: Workload, destination: Workload) -> Interest {
        let is_source_within_target = self.is_workload_interesting(source);
        let is_destination_within_target = self.is_workload_interesting(destination);

        trace!(
            "Classified report from {reporter_uid}: source {} interesting: {is_source_within_target}, destination {} interesting: {is_destination_within_target}",
            source.namespace,
            destination.namespace
        );

        Interest {
            is_interesting: is_source_within_target || is_destination_within_target,
            is_fully_within_target: is_source_within_target && is_destination_within_target,
            is_source_within_target,
            is_destination_within_target,
        }
    }

    fn is_workload_interesting(&self, workload: Workload) -> bool {
        match parse_bool(workload.opt_in) {
            Some(opted_in) => opted_in,
            None => {
                self.is_within_target(workload.namespace)
                    && !self.is_within_ignored(workload.namespace)
            }
        }
    }

    fn is_within_target(&self, namespace: &str) -> bool {
        is_namespace_specified(namespace)
            && (self.target_namespaces.is_empty()
                || self
                    .target_namespaces
                    .iter()
                    .any(|ns| ns.eq_ignore_ascii_case(namespace)))
    }

    fn is_within_ignored(&self, namespace: &str) -> bool {
        self.ignored_namespaces
            .iter()
            .any(|ns| ns.eq_ignore_ascii_case(namespace))
    }
}

impl Interest {
    /// Whether the report coming from a proxy of the given kind (`inbound`/`outbound`) is the
    /// canonical one for its call.
    pub fn is_actionable(&self, reporter_kind: &str) -> bool {
        let inbound = reporter_kind.eq_ignore_ascii_case("inbound");
        let outbound = reporter_kind.eq_ignore_ascii_case("outbound");

        (self.is_fully_within_target && inbound)
            || (self.is_source_within_target && !self.is_destination_within_target && outbound)
            || (!self.is_source_within_target && self.is_destination_within_target && inbound)
    }

    /// Source outside the monitored area calling into it.
    pub fn is_ingress(&self) -> bool {
        !self.is_source_within_target && self.is_destination_within_target
    }

    /// Source inside the monitored area calling out of it.
    pub fn is_egress(&self) -> bool {
        self.is_source_within_target && !self.is_destination_within_target
    }
}

fn is_namespace_specified(namespace: &str) -> bool {
    let namespace = namespace.trim();
    !namespace.is_empty() && !namespace.eq_ignore_ascii_case(UNKNOWN_VALUE)
}

/// Case-insensitive `true`/`false`, ignoring surrounding whitespace.
fn parse_bool(value: &str) -> Option<bool> {
    let value = value.trim();
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn workload(namespace: &str) -> Workload<'_> {
        Workload {
            namespace,
            opt_in: "",
        }
    }

    fn filter(targets: &[&str], ignored: &[&str]) -> NamespaceFilter {
        NamespaceFilter::new(
            targets.iter().map(|ns| ns.to_string()).collect(),
            ignored.iter().map(|ns| ns.to_string()).collect(),
        )
    }

    #[test]
    fn test_empty_target_list_matches_every_specified_namespace() {
        let interest = filter(&[], &[]).classify("uid", workload("a"), workload("b"));
        assert!(interest.is_fully_within_target);

        let interest = filter(&[], &[]).classify("uid", workload("unknown"), workload(" "));
        assert!(!interest.is_interesting);

        let interest = filter(&[], &[]).classify("uid", workload("UNKNOWN"), workload("b"));
        assert!(interest.is_interesting);
        assert!(!interest.is_source_within_target);
        assert!(interest.is_destination_within_target);
    }

    #[test]
    fn test_target_match_is_case_insensitive() {
        let interest = filter(&["Default"], &[]).classify("uid", workload("default"), workload("other"));
        assert!(interest.is_source_within_target);
        assert!(!interest.is_destination_within_target);
        assert!(interest.is_interesting);
        assert!(!interest.is_fully_within_target);
    }

    #[test]
    fn test_ignored_namespace_wins_over_target() {
        let interest = filter(&[], &["kube-system"]).classify(
            "uid",
            workload("KUBE-SYSTEM"),
            workload("default"),
        );
        assert!(!interest.is_source_within_target);
        assert!(interest.is_destination_within_target);
    }

    #[test]
    fn test_opt_in_label_overrides_namespace() {
        let source = Workload {
            namespace: "outside",
            opt_in: "True",
        };
        let destination = Workload {
            namespace: "default",
            opt_in: " false ",
        };
        let interest = filter(&["default"], &[]).classify("uid", source, destination);
        assert!(interest.is_source_within_target);
        assert!(!interest.is_destination_within_target);

        let ignored = Workload {
            namespace: "kube-system",
            opt_in: "true",
        };
        let interest = filter(&[], &["kube-system"]).classify("uid", ignored, workload(""));
        assert!(interest.is_source_within_target);
    }

    #[test]
    fn test_unparseable_opt_in_label_falls_back_to_namespace() {
        let source = Workload {
            namespace: "default",
            opt_in: "yes",
        };
        let interest = filter(&["default"], &[]).classify("uid", source, workload("x"));
        assert!(interest.is_source_within_target);
    }

    #[test]
    fn test_actionability() {
        let both = Interest {
            is_interesting: true,
            is_fully_within_target: true,
            is_source_within_target: true,
            is_destination_within_target: true,
        };
        assert!(both.is_actionable("inbound"));
        assert!(both.is_actionable("INBOUND"));
        assert!(!both.is_actionable("outbound"));

        let source_only = Interest {
            is_interesting: true,
            is_fully_within_target: false,
            is_source_within_target: true,
            is_destination_within_target: false,
        };
        assert!(source_only.is_actionable("outbound"));
        assert!(!source_only.is_actionable("inbound"));
        assert!(source_only.is_egress());

        let destination_only = Interest {
            is_interesting: true,
            is_fully_within_target: false,
            is_source_within_target: false,
            is_destination_within_target: true,
        };
        assert!(destination_only.is_actionable("inbound"));
        assert!(!destination_only.is_actionable("outbound"));
        assert!(destination_only.is_ingress());

        let neither = Interest {
            is_interesting: false,
            is_fully_within_target: false,
            is_source_within_target: false,
            is_destination_within_target: false,
        };
        assert!(!neither.is_actionable("inbound"));
        assert!(!neither.is_actionable("outbound"));
    }

    proptest! {
        #[test]
        fn classification_is_deterministic(
            source_ns in "[a-zA-Z]{0,8}",
            destination_ns in "[a-zA-Z]{0,8}",
            source_opt_in in prop_oneof![Just(""), Just("true"), Just("false"), Just("maybe")],
            destination_opt_in in prop_oneof![Just(""), Just("TRUE"), Just("False")],
            targets in proptest::collection::vec("[a-zA-Z]{1,8}", 0..3),
            ignored in proptest::collection::vec("[a-zA-Z]{1,8}", 0..3),
        ) {
            let filter = NamespaceFilter::new(targets, ignored);
            let source = Workload { namespace: &source_ns, opt_in: source_opt_in };
            let destination = Workload { namespace: &destination_ns, opt_in: destination_opt_in };

            let first = filter.classify("uid", source, destination);
            let second = filter.classify("uid", source, destination);
            prop_assert_eq!(first, second);
            prop_assert_eq!(
                first.is_interesting,
                first.is_source_within_target || first.is_destination_within_target
            );
            prop_assert_eq!(
                first.is_fully_within_target,
                first.is_source_within_target && first.is_destination_within_target
            );
        }

        #[test]
        fn outside_namespaces_without_opt_in_are_never_interesting(
            source_ns in "[a-z]{1,8}",
            destination_ns in "[a-z]{1,8}",
        ) {
            let filter = NamespaceFilter::new(vec!["MONITORED-NS".to_string()], vec![]);
            let interest = filter.classify("uid", workload(&source_ns), workload(&destination_ns));
            prop_assert!(!interest.is_interesting);
        }
    }
}
