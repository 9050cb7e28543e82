//! Exercises the seams around injection: the mutated manifest survives a
//! YAML round trip, and the emitted intent document parses the same way the
//! controller will parse it.

#![deny(rust_2018_idioms)]

use weft_inject::{inject, Injection, Manifest, Params};
use weft_policy::Intent;

const BILLING: &str = "\
apiVersion: v1
kind: Pod
metadata:
  name: billing
  namespace: shop
  annotations:
    weft.io/inject: enabled
    weft.io/dependencies: payments.svc
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

#[test]
fn an_injected_manifest_survives_reserialization() {
    let manifest = Manifest::from_yaml(BILLING).unwrap();
    let Injection::Injected { manifest, .. } = inject(manifest, &params()).unwrap() else {
        panic!("expected injection");
    };

    let reparsed = Manifest::from_yaml(&manifest.to_yaml().unwrap()).unwrap();
    assert_eq!(reparsed.spec.containers[0].name, "weft-proxy");
    assert_eq!(reparsed.spec.containers[1].name, "billing");
    assert_eq!(reparsed.spec.init_containers[0].name, "weft-init");

    // Feeding the output back through is a no-op.
    match inject(reparsed, &params()).unwrap() {
        Injection::AlreadyInjected(_) => {}
        outcome => panic!("expected pass-through, got {outcome:?}"),
    }
}

#[test]
fn the_emitted_intent_parses_as_the_controller_will() {
    let manifest = Manifest::from_yaml(BILLING).unwrap();
    let Injection::Injected { intent, .. } = inject(manifest, &params()).unwrap() else {
        panic!("expected injection");
    };

    let doc = serde_yaml::to_string(&intent).unwrap();
    let reparsed = Intent::from_yaml(&doc).unwrap();
    assert_eq!(reparsed, intent);
    assert_eq!(
        reparsed.to_bundle().unwrap().version,
        intent.to_bundle().unwrap().version,
    );
}
