//! The manifest mutation.
//!
//! Injection inserts the proxy container *ahead of* the workload container
//! and installs the interception rules from an init step that completes
//! before either starts, so the workload never handles an unmediated
//! request. Everything the proxy needs is wired through `WEFT_PROXY_*`
//! environment variables derived from the manifest. Injection is
//! idempotent: a manifest that already carries the proxy passes through
//! untouched.

use std::collections::BTreeMap;

use crate::manifest::{
    Capabilities, Container, ContainerPort, EnvVar, InvalidManifest, Manifest, SecurityContext,
    STATUS_ANNOTATION, STATUS_INJECTED,
};
use crate::rules::{Redirect, PROXY_UID};
use weft_policy::intent::{
    BackendSpec, ClusterSpec, Intent, KindSpec, MatchSpec, RouteSpec, DEFAULT_INBOUND_PORT,
    DEFAULT_OUTBOUND_PORT,
};

pub const PROXY_CONTAINER: &str = "weft-proxy";
pub const INIT_CONTAINER: &str = "weft-init";

const ADMIN_PORT: u16 = 15000;

// Environment names match the proxy's configuration surface.
const ENV_WORKLOAD: &str = "WEFT_PROXY_WORKLOAD";
const ENV_ZONE: &str = "WEFT_PROXY_ZONE";
const ENV_APP_PORT: &str = "WEFT_PROXY_APP_PORT";
const ENV_CONTROL_ADDR: &str = "WEFT_PROXY_CONTROL_ADDR";

/// Injection-time settings that do not come from the manifest.
#[derive(Clone, Debug)]
pub struct Params {
    pub proxy_image: String,
    pub init_image: String,
    /// Controller address handed to injected proxies.
    pub control_addr: String,
}

/// The outcome of processing one manifest.
#[derive(Clone, Debug)]
pub enum Injection {
    /// The manifest does not opt in; it passes through untouched.
    Unmarked(Manifest),
    /// The proxy is already attached; the manifest passes through untouched.
    AlreadyInjected(Manifest),
    /// The mutated manifest and the baseline intent for its workload.
    Injected { manifest: Manifest, intent: Intent },
}

#[derive(Debug, thiserror::Error)]
pub enum InvalidWorkload {
    #[error("manifest declares no containers")]
    NoContainers,

    #[error("workload declares no container port; the proxy needs an app port")]
    NoAppPort,

    #[error(transparent)]
    Manifest(#[from] InvalidManifest),
}

/// Attaches the proxy to a marked manifest.
pub fn inject(manifest: Manifest, params: &Params) -> Result<Injection, InvalidWorkload> {
    if !manifest.injectable() {
        return Ok(Injection::Unmarked(manifest));
    }
    if already_injected(&manifest) {
        return Ok(Injection::AlreadyInjected(manifest));
    }
    if manifest.spec.containers.is_empty() {
        return Err(InvalidWorkload::NoContainers);
    }
    let app_port = manifest.app_port().ok_or(InvalidWorkload::NoAppPort)?;

    let workload = manifest.workload();
    let zone = manifest.zone().map(str::to_string);
    let redirect = Redirect::new(manifest.app_ports(), manifest.reserved_ports()?);
    let intent = baseline(&workload, app_port, &manifest.dependencies());

    let mut manifest = manifest;
    manifest.spec.containers.insert(
        0,
        proxy_container(&workload, app_port, zone.as_deref(), params),
    );
    manifest
        .spec
        .init_containers
        .push(init_container(&redirect, params));
    manifest
        .metadata
        .annotations
        .insert(STATUS_ANNOTATION.to_string(), STATUS_INJECTED.to_string());

    Ok(Injection::Injected { manifest, intent })
}

/// The intent a freshly injected workload starts with: pass-through
/// interception, plus one authority route and registry cluster per declared
/// dependency. A workload that declares nothing gets pure pass-through.
pub fn baseline(workload: &str, app_port: u16, dependencies: &[String]) -> Intent {
    let mut intent = Intent::passthrough(workload, app_port);
    if dependencies.is_empty() {
        return intent;
    }

    for dep in dependencies {
        intent.routes.push(RouteSpec {
            name: dep.clone(),
            r#match: MatchSpec {
                authority: Some(dep.clone()),
                ..MatchSpec::default()
            },
            backends: vec![BackendSpec {
                cluster: dep.clone(),
                weight: 1,
            }],
            header_override: None,
            retry: None,
            timeout_ms: None,
        });
        intent.clusters.push(ClusterSpec {
            name: dep.clone(),
            r#static: None,
            registry: Some(dep.clone()),
            balancer: None,
            outlier: None,
            limit: None,
        });
    }

    if let Some(outbound) = intent
        .listeners
        .iter_mut()
        .find(|l| matches!(l.kind, KindSpec::Outbound))
    {
        outbound.routes = dependencies.to_vec();
    }
    intent
}

fn already_injected(manifest: &Manifest) -> bool {
    manifest.annotation(STATUS_ANNOTATION) == Some(STATUS_INJECTED)
        || manifest
            .spec
            .containers
            .iter()
            .any(|c| c.name == PROXY_CONTAINER)
}

fn proxy_container(
    workload: &str,
    app_port: u16,
    zone: Option<&str>,
    params: &Params,
) -> Container {
    let mut env = vec![
        env_var(ENV_WORKLOAD, workload),
        env_var(ENV_APP_PORT, &app_port.to_string()),
        env_var(ENV_CONTROL_ADDR, &params.control_addr),
    ];
    if let Some(zone) = zone {
        env.push(env_var(ENV_ZONE, zone));
    }
    Container {
        name: PROXY_CONTAINER.to_string(),
        image: params.proxy_image.clone(),
        command: Vec::new(),
        ports: vec![
            port(DEFAULT_INBOUND_PORT, "weft-inbound"),
            port(DEFAULT_OUTBOUND_PORT, "weft-outbound"),
            port(ADMIN_PORT, "weft-admin"),
        ],
        env,
        // Runs as the UID the egress rules exempt.
        security_context: Some(SecurityContext {
            run_as_user: Some(u64::from(PROXY_UID)),
            capabilities: None,
            extra: BTreeMap::new(),
        }),
        extra: BTreeMap::new(),
    }
}

fn init_container(redirect: &Redirect, params: &Params) -> Container {
    Container {
        name: INIT_CONTAINER.to_string(),
        image: params.init_image.clone(),
        command: vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            redirect.script(),
        ],
        ports: Vec::new(),
        env: Vec::new(),
        security_context: Some(SecurityContext {
            run_as_user: Some(0),
            capabilities: Some(Capabilities {
                add: vec!["NET_ADMIN".to_string()],
            }),
            extra: BTreeMap::new(),
        }),
        extra: BTreeMap::new(),
    }
}

fn env_var(name: &str, value: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value: Some(value.to_string()),
        extra: BTreeMap::new(),
    }
}

fn port(container_port: u16, name: &str) -> ContainerPort {
    ContainerPort {
        container_port,
        name: Some(name.to_string()),
        extra: BTreeMap::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BILLING: &str = "\
metadata:
  name: billing
  namespace: shop
  annotations:
    weft.io/inject: enabled
    weft.io/zone: us-east-1a
    weft.io/reserved-ports: \"5432\"
    weft.io/dependencies: \"payments.svc, catalog.svc\"
spec:
  containers:
    - name: billing
      image: shop/billing:7.3
      ports:
        - containerPort: 8080
";

    fn params() -> Params {
        Params {
            proxy_image: "weft/proxy:0.1.0".to_string(),
            init_image: "weft/init:0.1.0".to_string(),
            control_addr: "weft-controller:8100".to_string(),
        }
    }

    fn injected(doc: &str) -> (Manifest, Intent) {
        let manifest = Manifest::from_yaml(doc).unwrap();
        match inject(manifest, &params()).unwrap() {
            Injection::Injected { manifest, intent } => (manifest, intent),
            outcome => panic!("expected injection, got {outcome:?}"),
        }
    }

    #[test]
    fn the_proxy_starts_ahead_of_the_workload() {
        let (manifest, _) = injected(BILLING);

        let names: Vec<_> = manifest.spec.containers.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec![PROXY_CONTAINER, "billing"]);
        assert_eq!(manifest.spec.init_containers.len(), 1);
        assert_eq!(manifest.spec.init_containers[0].name, INIT_CONTAINER);
        assert_eq!(
            manifest.annotation(STATUS_ANNOTATION),
            Some(STATUS_INJECTED),
        );
    }

    #[test]
    fn proxy_environment_is_derived_from_the_manifest() {
        let (manifest, _) = injected(BILLING);

        let proxy = &manifest.spec.containers[0];
        let env: BTreeMap<_, _> = proxy
            .env
            .iter()
            .map(|e| (e.name.as_str(), e.value.as_deref().unwrap()))
            .collect();
        assert_eq!(env["WEFT_PROXY_WORKLOAD"], "shop/billing");
        assert_eq!(env["WEFT_PROXY_APP_PORT"], "8080");
        assert_eq!(env["WEFT_PROXY_CONTROL_ADDR"], "weft-controller:8100");
        assert_eq!(env["WEFT_PROXY_ZONE"], "us-east-1a");

        assert_eq!(
            proxy.security_context.as_ref().unwrap().run_as_user,
            Some(u64::from(PROXY_UID)),
        );
    }

    #[test]
    fn the_init_step_installs_the_redirect() {
        let (manifest, _) = injected(BILLING);

        let init = &manifest.spec.init_containers[0];
        assert_eq!(init.command[0], "/bin/sh");
        let script = &init.command[2];
        assert!(script.contains("--dports 8080 -j REDIRECT --to-ports 15006"));
        assert!(script.contains("-j REDIRECT --to-ports 15001"));
        assert!(script.contains("--dports 5432 -j RETURN"));
        assert!(script.contains(&format!("--uid-owner {PROXY_UID} -j RETURN")));

        let caps = init
            .security_context
            .as_ref()
            .unwrap()
            .capabilities
            .as_ref()
            .unwrap();
        assert_eq!(caps.add, vec!["NET_ADMIN".to_string()]);
    }

    #[test]
    fn injection_is_idempotent() {
        let (manifest, _) = injected(BILLING);
        match inject(manifest.clone(), &params()).unwrap() {
            Injection::AlreadyInjected(unchanged) => assert_eq!(unchanged, manifest),
            outcome => panic!("expected pass-through, got {outcome:?}"),
        }
    }

    #[test]
    fn unmarked_manifests_pass_through() {
        let doc = BILLING.replace("weft.io/inject: enabled", "weft.io/inject: disabled");
        let manifest = Manifest::from_yaml(&doc).unwrap();
        match inject(manifest.clone(), &params()).unwrap() {
            Injection::Unmarked(unchanged) => assert_eq!(unchanged, manifest),
            outcome => panic!("expected pass-through, got {outcome:?}"),
        }
    }

    #[test]
    fn a_marked_workload_without_ports_is_rejected() {
        let doc = "\
metadata:
  name: portless
  annotations:
    weft.io/inject: enabled
spec:
  containers:
    - name: app
      image: app:1
";
        let manifest = Manifest::from_yaml(doc).unwrap();
        assert!(matches!(
            inject(manifest, &params()),
            Err(InvalidWorkload::NoAppPort),
        ));
    }

    #[test]
    fn the_baseline_intent_routes_declared_dependencies() {
        let (_, intent) = injected(BILLING);

        assert_eq!(intent.workload, "shop/billing");
        let routes: Vec<_> = intent.routes.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(routes, vec!["payments.svc", "catalog.svc"]);
        assert_eq!(
            intent.routes[0].r#match.authority.as_deref(),
            Some("payments.svc"),
        );
        let clusters: Vec<_> = intent
            .clusters
            .iter()
            .map(|c| (c.name.as_str(), c.registry.as_deref().unwrap()))
            .collect();
        assert_eq!(
            clusters,
            vec![
                ("payments.svc", "payments.svc"),
                ("catalog.svc", "catalog.svc"),
            ],
        );

        let outbound = intent
            .listeners
            .iter()
            .find(|l| matches!(l.kind, KindSpec::Outbound))
            .unwrap();
        assert_eq!(outbound.routes, vec!["payments.svc", "catalog.svc"]);

        // The generated document compiles like any operator-authored one.
        intent.to_bundle().unwrap();
    }

    #[test]
    fn no_dependencies_means_pure_passthrough() {
        let doc = BILLING.replace(
            "    weft.io/dependencies: \"payments.svc, catalog.svc\"\n",
            "",
        );
        let (_, intent) = injected(&doc);
        assert_eq!(intent, Intent::passthrough("shop/billing", 8080));
    }
}
