// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, TimeDelta, Utc};
use hyper::Uri;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use tracing::trace;

use crate::correlation::{acknowledge_request, new_root_id, start_dependency};
use crate::instance_tags::{get_bool, get_i64, get_string, to_date_time};
use crate::interest::{Interest, NamespaceFilter, Workload};
use crate::proto::InstanceMsg;
use crate::telemetry::{
    DependencyTelemetry, OperationData, RequestTelemetry, SyntheticContext, TelemetryRecord,
};

const UNKNOWN_VALUE: &str = "unknown";
const KUBERNETES_PREFIX: &str = "kubernetes://";
const TRACKED_COMPONENT_TYPE: &str = "Http (tracked component)";
const SYNTHETIC_SOURCE: &str = "Application Insights Availability Monitoring";
/// Hosts of the telemetry backend itself. Calls to them are never reported.
const BACKEND_HOSTS: [&str; 2] = ["dc.services.visualstudio.com", "rt.services.visualstudio.com"];

fn app_id_regex() -> Option<&'static Regex> {
    static APP_ID: OnceLock<Option<Regex>> = OnceLock::new();
    APP_ID
        .get_or_init(|| Regex::new(r"^appId=(?<appId>.+)$").ok())
        .as_ref()
}

/// Extracts the app id from a `Request-Context` header value (`appId=<id>`).
fn extract_app_id(request_context: &str) -> Option<String> {
    if request_context.trim().is_empty() {
        return None;
    }
    app_id_regex()?
        .captures(request_context)
        .and_then(|caps| caps.name("appId"))
        .map(|app_id| app_id.as_str().to_string())
}

/// Lower-cases a role value and strips the legacy `kubernetes://` prefix from it.
fn normalize_role(value: &str) -> String {
    value.to_lowercase().replace(KUBERNETES_PREFIX, "")
}

fn is_unknown(value: &str) -> bool {
    value.trim().is_empty() || value.eq_ignore_ascii_case(UNKNOWN_VALUE)
}

fn role_or(value: &str, fallback: &str) -> String {
    let role = normalize_role(value);
    if is_unknown(&role) {
        fallback.to_string()
    } else {
        role
    }
}

fn non_empty(value: &str) -> Option<&str> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// `"{method} {route-or-path}"`, degrading to whichever parts are present.
pub fn telemetry_name(method: Option<&str>, path: Option<&str>, route: Option<&str>) -> Option<String> {
    match (method, route.or(path)) {
        (None, None) => None,
        (Some(method), None) => Some(method.to_string()),
        (None, Some(route_or_path)) => Some(route_or_path.to_string()),
        (Some(method), Some(route_or_path)) => Some(format!("{method} {route_or_path}")),
    }
}

/// Everything the generator reads from an instance, with roles already normalized.
struct CallFacts<'a> {
    reporter_uid: &'a str,
    reporter_kind: String,
    protocol: String,

    source_uid: &'a str,
    source_name: &'a str,
    source_workload_name: &'a str,
    source_namespace: &'a str,
    source_opt_in: &'a str,
    is_ingress_gateway: bool,

    destination_uid: &'a str,
    destination_name: &'a str,
    destination_workload_name: &'a str,
    destination_namespace: &'a str,
    destination_opt_in: &'a str,

    destination_service_uid: &'a str,
    destination_service_host: &'a str,
    destination_service_name: &'a str,
    destination_service_namespace: &'a str,

    source_role_name: String,
    source_role_instance: String,
    destination_role_name: String,
    destination_role_instance: String,

    request_id: &'a str,
    synthetic_run_id: &'a str,
    synthetic_location: &'a str,
    request_app_id: Option<String>,
    response_app_id: Option<String>,

    user_agent: &'a str,
    host: &'a str,
    status_code: i64,
    path: &'a str,
    method: &'a str,
    scheme: &'a str,
    port: i64,
}

impl<'a> CallFacts<'a> {
    fn extract(instance: &'a InstanceMsg) -> Self {
        let tags = &instance.span_tags;
        let user_agent = get_string(tags, "http.useragent");
        let host = get_string(tags, "host");

        CallFacts {
            reporter_uid: get_string(tags, "context.reporter.uid"),
            reporter_kind: get_string(tags, "context.reporter.kind").to_lowercase(),
            protocol: get_string(tags, "context.protocol").to_lowercase(),

            source_uid: get_string(tags, "source.uid"),
            source_name: get_string(tags, "source.name"),
            source_workload_name: get_string(tags, "source.workload.name"),
            source_namespace: get_string(tags, "source.workload.namespace"),
            source_opt_in: get_string(tags, "source.labels.appinsights.monitoring.enabled"),
            is_ingress_gateway: get_bool(tags, "source.labels.istio.isingressgateway"),

            destination_uid: get_string(tags, "destination.uid"),
            destination_name: get_string(tags, "destination.name"),
            destination_workload_name: get_string(tags, "destination.workload.name"),
            destination_namespace: get_string(tags, "destination.workload.namespace"),
            destination_opt_in: get_string(
                tags,
                "destination.labels.appinsights.monitoring.enabled",
            ),

            destination_service_uid: get_string(tags, "destination.service.uid"),
            destination_service_host: get_string(tags, "destination.service.host"),
            destination_service_name: get_string(tags, "destination.service.name"),
            destination_service_namespace: get_string(tags, "destination.service.namespace"),

            source_role_name: role_or(get_string(tags, "source.role.name"), user_agent),
            source_role_instance: role_or(get_string(tags, "source.role.instance"), user_agent),
            destination_role_name: role_or(get_string(tags, "destination.role.name"), host),
            destination_role_instance: role_or(get_string(tags, "destination.role.instance"), host),

            request_id: get_string(tags, "request.headers.request.id"),
            synthetic_run_id: get_string(tags, "request.headers.synthetictest.runid"),
            synthetic_location: get_string(tags, "request.headers.synthetictest.location"),
            request_app_id: extract_app_id(get_string(tags, "request.headers.request.context")),
            response_app_id: extract_app_id(get_string(tags, "response.headers.request.context")),

            user_agent,
            host,
            status_code: get_i64(tags, "http.status_code"),
            path: get_string(tags, "http.path"),
            method: get_string(tags, "http.method"),
            scheme: get_string(tags, "request.scheme"),
            port: get_i64(tags, "destination.port"),
        }
    }

    fn source(&self) -> Workload<'_> {
        Workload {
            namespace: self.source_namespace,
            opt_in: self.source_opt_in,
        }
    }

    fn destination(&self) -> Workload<'_> {
        Workload {
            namespace: self.destination_namespace,
            opt_in: self.destination_opt_in,
        }
    }

    /// `{protocol}://{destination role instance}{path}[:{port}]`
    fn url(&self) -> String {
        let separator = if self.protocol.trim().is_empty() {
            ""
        } else {
            "://"
        };
        let port = if self.port > 0 {
            format!(":{}", self.port)
        } else {
            String::new()
        };
        format!(
            "{}{separator}{}{}{port}",
            self.protocol, self.destination_role_instance, self.path
        )
    }

    /// Url rebuilt from the request scheme and `host` tag, for when the effective url is not
    /// absolute.
    fn fallback_url(&self) -> Option<String> {
        if self.host.is_empty() {
            return None;
        }
        let slash = if !self.path.is_empty() && !self.path.starts_with('/') {
            "/"
        } else {
            ""
        };
        Some(format!("{}://{}{slash}{}", self.scheme, self.host, self.path))
    }

    fn properties(&self) -> BTreeMap<String, String> {
        [
            ("k8s.context.reporter.kind", self.reporter_kind.as_str()),
            ("k8s.context.reporter.uid", self.reporter_uid),
            ("k8s.source.uid", self.source_uid),
            ("k8s.source.name", self.source_name),
            ("k8s.source.workload.name", self.source_workload_name),
            ("k8s.source.workload.namespace", self.source_namespace),
            ("k8s.destination.uid", self.destination_uid),
            ("k8s.destination.name", self.destination_name),
            ("k8s.destination.workload.name", self.destination_workload_name),
            ("k8s.destination.workload.namespace", self.destination_namespace),
            ("k8s.destination.service.uid", self.destination_service_uid),
            ("k8s.destination.service.host", self.destination_service_host),
            ("k8s.destination.service.name", self.destination_service_name),
            ("k8s.destination.service.namespace", self.destination_service_namespace),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
    }
}

/// Which side of the call a record is reported on behalf of.
#[derive(Clone, Copy)]
enum Peer {
    Source,
    Destination,
}

/// Values shared by every record generated from one instance.
struct CallContext<'a> {
    facts: CallFacts<'a>,
    url: String,
    success: bool,
    status_code: String,
    timestamp: DateTime<Utc>,
    duration: TimeDelta,
    properties: BTreeMap<String, String>,
}

impl CallContext<'_> {
    fn role(&self, peer: Peer) -> (String, String) {
        match peer {
            Peer::Source => (
                self.facts.source_role_name.clone(),
                self.facts.source_role_instance.clone(),
            ),
            Peer::Destination => (
                self.facts.destination_role_name.clone(),
                self.facts.destination_role_instance.clone(),
            ),
        }
    }

    fn operation(&self, id: String, parent_id: String, peer: Peer) -> OperationData {
        let (role_name, role_instance) = self.role(peer);
        OperationData::new(
            telemetry_name(non_empty(self.facts.method), non_empty(self.facts.path), None),
            id,
            parent_id,
            self.timestamp,
            self.duration,
            self.success,
            role_name,
            role_instance,
            self.properties.clone(),
        )
    }

    fn request(
        &self,
        id: String,
        parent_id: String,
        peer: Peer,
        propagate_synthetic: bool,
    ) -> TelemetryRecord {
        let url = match self.url.parse::<Uri>() {
            Ok(uri) if uri.scheme().is_some() && uri.host().is_some() => Some(self.url.clone()),
            _ => self.facts.fallback_url(),
        };

        let synthetic = if propagate_synthetic
            && !self.facts.synthetic_run_id.is_empty()
            && !self.facts.synthetic_location.is_empty()
        {
            Some(SyntheticContext {
                synthetic_source: SYNTHETIC_SOURCE.to_string(),
                user_id: format!(
                    "{}_{}",
                    self.facts.synthetic_location, self.facts.synthetic_run_id
                ),
                session_id: self.facts.synthetic_run_id.to_string(),
            })
        } else {
            None
        };

        TelemetryRecord::Request(RequestTelemetry {
            operation: self.operation(id, parent_id, peer),
            response_code: self.status_code.clone(),
            url,
            user_agent: self.facts.user_agent.to_string(),
            source: self.facts.request_app_id.clone(),
            synthetic,
        })
    }

    /// `None` when the call targets the telemetry backend.
    fn dependency(&self, id: String, parent_id: String, peer: Peer) -> Option<TelemetryRecord> {
        let host = match self.url.parse::<Uri>() {
            Ok(uri) => uri.host().map(str::to_string),
            Err(_) => None,
        }
        .unwrap_or_else(|| self.facts.destination_role_instance.clone());

        let lowercase_host = host.to_lowercase();
        if BACKEND_HOSTS
            .iter()
            .any(|backend| lowercase_host.starts_with(backend))
        {
            trace!("Not reporting a dependency on the telemetry backend: {host}");
            return None;
        }

        let (dependency_type, target) = match &self.facts.response_app_id {
            Some(app_id) => (TRACKED_COMPONENT_TYPE.to_string(), format!("{host} | {app_id}")),
            None => (self.facts.protocol.clone(), host),
        };

        Some(TelemetryRecord::Dependency(DependencyTelemetry {
            operation: self.operation(id, parent_id, peer),
            result_code: self.status_code.clone(),
            data: self.url.clone(),
            dependency_type,
            target,
        }))
    }
}

/// Turns mesh instances into request and dependency records.
///
/// Stateless apart from its namespace filter; safe to share between concurrent batches.
#[derive(Debug, Clone, Default)]
pub struct TelemetryGenerator {
    filter: NamespaceFilter,
}

impl TelemetryGenerator {
    pub fn new(target_namespaces: Vec<String>, ignored_namespaces: Vec<String>) -> Self {
        TelemetryGenerator {
            filter: NamespaceFilter::new(target_namespaces, ignored_namespaces),
        }
    }

    /// Records for one instance, in the order: gateway request, gateway dependency,
    /// dependency, request. Any of them may be missing.
    pub fn generate(&self, instance: &InstanceMsg) -> impl Iterator<Item = TelemetryRecord> {
        self.generate_records(instance).into_iter()
    }

    /// Records for every instance, concatenated in input order.
    pub fn generate_all<'a>(
        &'a self,
        instances: &'a [InstanceMsg],
    ) -> impl Iterator<Item = TelemetryRecord> + 'a {
        instances
            .iter()
            .flat_map(move |instance| self.generate(instance))
    }

    fn generate_records(&self, instance: &InstanceMsg) -> Vec<TelemetryRecord> {
        let facts = CallFacts::extract(instance);
        let interest = self
            .filter
            .classify(facts.reporter_uid, facts.source(), facts.destination());

        trace!(
            "source: {}.{}, destination: {}.{}, reporter: {}, kind: {}",
            facts.source_name,
            facts.source_namespace,
            facts.destination_name,
            facts.destination_namespace,
            facts.reporter_uid,
            facts.reporter_kind
        );

        if !interest.is_interesting || !facts.protocol.starts_with("http") {
            trace!(
                "SKIPPED: interesting: {}, protocol: {}",
                interest.is_interesting,
                facts.protocol
            );
            return Vec::new();
        }

        if !interest.is_actionable(&facts.reporter_kind) {
            trace!(
                "NOT ACTIONABLE: fully within target: {}, reporter kind: {}, source within target: {}, destination within target: {}",
                interest.is_fully_within_target,
                facts.reporter_kind,
                interest.is_source_within_target,
                interest.is_destination_within_target
            );
            return Vec::new();
        }

        let now = Utc::now();
        let timestamp = instance
            .start_time
            .as_ref()
            .and_then(to_date_time)
            .unwrap_or(now);
        let end = instance
            .end_time
            .as_ref()
            .and_then(to_date_time)
            .unwrap_or(now);

        let code = if facts.status_code >= 400 {
            facts.status_code
        } else {
            0
        };

        let context = CallContext {
            url: facts.url(),
            success: code == 0,
            status_code: facts.status_code.to_string(),
            timestamp,
            duration: end - timestamp,
            properties: facts.properties(),
            facts,
        };

        Self::correlate(&context, &interest)
    }

    /// Threads hierarchical ids through the records of one call.
    fn correlate(context: &CallContext, interest: &Interest) -> Vec<TelemetryRecord> {
        let incoming_request_id_present = !context.facts.request_id.trim().is_empty();
        let incoming_request_id = if incoming_request_id_present {
            context.facts.request_id.to_string()
        } else {
            format!("|{}.", new_root_id())
        };

        let mut records = Vec::with_capacity(4);
        let mut latest_id = incoming_request_id.clone();

        if context.facts.is_ingress_gateway {
            // internet -> gateway, then gateway -> pod, both on behalf of the gateway
            let (gateway_request_id, gateway_parent_id) = if incoming_request_id_present {
                (
                    acknowledge_request(&incoming_request_id),
                    incoming_request_id.clone(),
                )
            } else {
                (incoming_request_id.clone(), String::new())
            };
            records.push(context.request(
                gateway_request_id.clone(),
                gateway_parent_id,
                Peer::Source,
                true,
            ));

            let gateway_dependency_id = start_dependency(&gateway_request_id);
            records.extend(context.dependency(
                gateway_dependency_id.clone(),
                gateway_request_id,
                Peer::Source,
            ));
            latest_id = gateway_dependency_id;
        }

        if !interest.is_ingress() {
            // an egress call carrying its own request id keeps it, so the app's trace continues
            let dependency_id = if interest.is_egress() && incoming_request_id_present {
                incoming_request_id.clone()
            } else {
                start_dependency(&latest_id)
            };
            records.extend(context.dependency(
                dependency_id.clone(),
                latest_id.clone(),
                Peer::Source,
            ));
            latest_id = dependency_id;
        }

        if interest.is_destination_within_target {
            records.push(context.request(
                acknowledge_request(&latest_id),
                latest_id,
                Peer::Destination,
                !context.facts.is_ingress_gateway,
            ));
        }

        records
    }
}
