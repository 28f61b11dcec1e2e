use crate::features::service_binding::repo::{BindingRequest, BindingResponse, BindingTransport};
use devlink_core::{
    CoreError, InstanceAddress, InstanceMode, InstanceRecord, RegistrySource, Result,
};
use reqwest::Url;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Status of a locally synthesized response for a target that is not running.
pub const UNAVAILABLE_STATUS: u16 = 503;
/// Status of a locally synthesized response for a target that stopped answering.
pub const UNREACHABLE_STATUS: u16 = 502;

/// Where a binding call goes once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchTarget {
    pub instance: String,
    pub address: InstanceAddress,
    /// Extra headers a remote preview session requires.
    pub headers: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Dispatch(DispatchTarget),
    /// Diagnostic response to hand back to the caller.
    Unavailable(BindingResponse),
}

/// Resolves bindings against the registry and dispatches calls.
///
/// Every call reads the registry afresh; nothing is cached between calls.
pub struct BindingResolver {
    source: Arc<dyn RegistrySource>,
    transport: Arc<dyn BindingTransport>,
    own: Option<InstanceRecord>,
}

impl BindingResolver {
    pub fn new(source: Arc<dyn RegistrySource>, transport: Arc<dyn BindingTransport>) -> Self {
        Self {
            source,
            transport,
            own: None,
        }
    }

    /// Bindings naming `own.name` resolve to `own` without a registry lookup.
    pub fn with_own_record(mut self, own: InstanceRecord) -> Self {
        self.own = Some(own);
        self
    }

    pub fn own_name(&self) -> Option<&str> {
        self.own.as_ref().map(|own| own.name.as_str())
    }

    async fn lookup(&self, name: &str) -> Option<InstanceRecord> {
        match &self.own {
            Some(own) if own.name == name => Some(own.clone()),
            _ => self.source.lookup(name).await,
        }
    }

    pub async fn resolve_service(
        &self,
        binding: &str,
        service: &str,
        entrypoint: Option<&str>,
    ) -> Resolution {
        let Some(record) = self.lookup(service).await else {
            debug!(binding = %binding, service = %service, "Binding target is not registered");
            return Resolution::Unavailable(missing_service(binding, service));
        };

        match entrypoint {
            None => Resolution::Dispatch(target_for(&record)),
            Some(entrypoint) => match record.entrypoints.get(entrypoint) {
                Some(address) => {
                    let mut target = target_for(&record);
                    target.address = InstanceAddress::new(
                        record.address.protocol,
                        address.host.clone(),
                        address.port,
                    );
                    Resolution::Dispatch(target)
                }
                None => Resolution::Unavailable(missing_entrypoint(binding, service, entrypoint)),
            },
        }
    }

    /// Finds the instance exporting `class_name` and resolves to it.
    pub async fn resolve_object(
        &self,
        binding: &str,
        class_name: &str,
        script_name: Option<&str>,
    ) -> Resolution {
        if let (Some(own), Some(script)) = (&self.own, script_name) {
            if own.name == script {
                return Resolution::Dispatch(target_for(own));
            }
        }

        let snapshot = self.source.snapshot().await;
        match snapshot.object_exporter(class_name, script_name) {
            Some(record) => Resolution::Dispatch(target_for(record)),
            None => {
                debug!(binding = %binding, class = %class_name, "No instance exports the object class");
                Resolution::Unavailable(missing_object(binding, class_name, script_name))
            }
        }
    }

    /// Sends `request` to `target`, rewriting the URL origin. Transport
    /// failures come back as a diagnostic response rather than an error.
    pub async fn dispatch(
        &self,
        binding: &str,
        target: &DispatchTarget,
        mut request: BindingRequest,
    ) -> BindingResponse {
        match rewrite_url(&request.url, &target.address) {
            Ok(url) => request.url = url,
            Err(error) => {
                return BindingResponse::diagnostic(400, format!("Binding {binding}: {error}"))
            }
        }
        for (name, value) in &target.headers {
            request.set_header(name, value.clone());
        }

        match self.transport.dispatch(request).await {
            Ok(response) => response,
            Err(CoreError::InvalidRecord(message)) => {
                BindingResponse::diagnostic(400, format!("Binding {binding}: {message}"))
            }
            Err(error) => {
                warn!(binding = %binding, instance = %target.instance, error = %error, "Binding target unreachable");
                BindingResponse::diagnostic(
                    UNREACHABLE_STATUS,
                    format!(
                        "Binding {binding}: the devlink session for \"{}\" at {} is registered but unreachable. \
                         It may have crashed; restart it and retry.",
                        target.instance,
                        target.address.origin()
                    ),
                )
            }
        }
    }

    pub async fn fetch_service(
        &self,
        binding: &str,
        service: &str,
        entrypoint: Option<&str>,
        request: BindingRequest,
    ) -> BindingResponse {
        match self.resolve_service(binding, service, entrypoint).await {
            Resolution::Dispatch(target) => self.dispatch(binding, &target, request).await,
            Resolution::Unavailable(response) => response,
        }
    }
}

fn target_for(record: &InstanceRecord) -> DispatchTarget {
    DispatchTarget {
        instance: record.name.clone(),
        address: record.address.clone(),
        headers: match record.mode {
            InstanceMode::Local => BTreeMap::new(),
            InstanceMode::Remote => record.headers.clone(),
        },
    }
}

/// Points `url` at `address`, keeping its path, query and fragment.
/// Relative URLs are taken to be paths on the target.
pub fn rewrite_url(url: &str, address: &InstanceAddress) -> Result<String> {
    let invalid = |reason: &str| CoreError::InvalidRecord(format!("cannot route {url:?}: {reason}"));

    let mut parsed = if url.starts_with('/') {
        Url::parse("http://localhost/").and_then(|base| base.join(url))
    } else {
        Url::parse(url)
    }
    .map_err(|_| invalid("not a valid URL"))?;

    parsed
        .set_scheme(address.protocol.as_str())
        .map_err(|_| invalid("unsupported scheme"))?;
    parsed
        .set_host(Some(&address.host))
        .map_err(|_| invalid("invalid target host"))?;
    parsed
        .set_port(Some(address.port))
        .map_err(|_| invalid("invalid target port"))?;
    Ok(parsed.into())
}

fn missing_service(binding: &str, service: &str) -> BindingResponse {
    BindingResponse::diagnostic(
        UNAVAILABLE_STATUS,
        format!(
            "Couldn't find a devlink session for service \"{service}\" to proxy to (binding {binding}). \
             Start \"{service}\" with devlink, then retry."
        ),
    )
}

fn missing_entrypoint(binding: &str, service: &str, entrypoint: &str) -> BindingResponse {
    BindingResponse::diagnostic(
        UNAVAILABLE_STATUS,
        format!(
            "The devlink session for service \"{service}\" does not export an entrypoint named \
             \"{entrypoint}\" (binding {binding}). Check the entrypoint name or restart \"{service}\"."
        ),
    )
}

fn missing_object(binding: &str, class_name: &str, script_name: Option<&str>) -> BindingResponse {
    let host = match script_name {
        Some(script) => format!("service \"{script}\""),
        None => "any running service".to_string(),
    };
    BindingResponse::diagnostic(
        UNAVAILABLE_STATUS,
        format!(
            "Couldn't find {host} exporting stateful object class \"{class_name}\" \
             (binding {binding}). Start the service that defines it, then retry."
        ),
    )
}
