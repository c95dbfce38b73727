/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

mod support;

use multicast_registry::config::RegistryStoreConfig;
use multicast_registry::{
    metadata, EnumerateRequest, FieldSpec, FieldType, Filter, FilterCompiler, IdentitySchema,
    MulticastRegistry, MulticastRequest, RegisterRequest, RegistryCode,
};
use proptest::prelude::*;
use registry_conformance::fixtures::{fleet_filters, sensor_fleet};
use registry_conformance::store_contract::check_store_contract;
use registry_conformance::strategies::{arb_dataset, arb_filter};
use registry_conformance::{evaluate_everywhere, store_bindings};
use serde_json::json;
use support::{filter, listed_identities, make_registry, test_config};

#[tokio::test(flavor = "multi_thread")]
async fn every_store_binding_honors_the_store_contract() {
    registry_conformance::init_logging();
    for binding in store_bindings() {
        check_store_contract(&binding).await;
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn fleet_filters_select_the_same_identities_everywhere() {
    registry_conformance::init_logging();
    let compiler = FilterCompiler::default();
    let fleet = sensor_fleet();

    for binding in store_bindings() {
        for (name, expression) in fleet_filters() {
            let filter = compiler.compile(&expression).unwrap();
            let evaluations = evaluate_everywhere(&binding, &fleet, filter.as_ref())
                .await
                .unwrap();
            assert!(
                evaluations.agree(),
                "{binding:?} disagrees on '{name}': {evaluations:?}"
            );
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn fleet_filters_select_the_expected_identities() {
    registry_conformance::init_logging();
    let compiler = FilterCompiler::default();
    let fleet = sensor_fleet();
    let binding = store_bindings()[0];

    let cases = [
        (json!({"type": "sensor", "zone": "1"}), vec!["svc-a"]),
        (json!({"priority.gte": 2, "priority.lt": 5}), vec!["svc-b", "svc-d", "svc-f"]),
        (json!({"tags.contains": "outdoor"}), vec!["svc-a", "svc-d"]),
        (
            json!({"location.building.exists": false}),
            vec!["svc-c", "svc-e", "svc-g", "svc-h"],
        ),
        (json!({"type.ne": "sensor"}), vec!["svc-c", "svc-d", "svc-f"]),
        (json!({"type": "printer"}), vec![]),
    ];
    for (expression, expected) in cases {
        let filter = compiler.compile(&expression).unwrap();
        let evaluations = evaluate_everywhere(&binding, &fleet, filter.as_ref())
            .await
            .unwrap();
        assert_eq!(evaluations.auto, expected, "{expression}");
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn timestamp_fields_compare_as_instants_on_every_store() {
    registry_conformance::init_logging();
    let mut selections = Vec::new();

    for store in [
        RegistryStoreConfig::Memory,
        RegistryStoreConfig::KeyValue {
            prefix: "multicast:registry:".to_string(),
        },
    ] {
        let mut config = test_config("timestamps");
        config.backend_slots.registry = store.clone();
        config.identity_schema = Some(
            IdentitySchema::new().with_field("seen", FieldSpec::new(FieldType::Timestamp)),
        );
        let registry = MulticastRegistry::from_config(config).unwrap();
        registry
            .register(RegisterRequest::new(
                "svc-t",
                metadata([("seen", "2026-05-01T00:00:00Z".into())]),
            ))
            .await
            .unwrap();

        let same_instant = listed_identities(
            &registry,
            filter(&registry, json!({"seen": "2026-05-01T02:00:00+02:00"})),
        )
        .await;
        let earlier = listed_identities(
            &registry,
            filter(&registry, json!({"seen.lt": "2026-05-01T01:00:00+02:00"})),
        )
        .await;
        assert_eq!(same_instant, vec!["svc-t"], "{store:?}");
        assert!(earlier.is_empty(), "{store:?}");
        selections.push((same_instant, earlier));
    }

    assert_eq!(selections[0], selections[1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn filters_beyond_the_limits_are_rejected() {
    registry_conformance::init_logging();
    let registry = make_registry("limits");

    let mut nested = json!({"zone": "1"});
    for _ in 0..5 {
        nested = json!({"$and": [nested]});
    }
    assert!(registry.compile_filter(&nested).is_ok());
    nested = json!({"$and": [nested]});
    assert_eq!(
        registry.compile_filter(&nested).unwrap_err().code,
        RegistryCode::InvalidFilter
    );

    let clauses = |count: usize| {
        let children: Vec<_> = (0..count)
            .map(|zone| json!({"zone": zone.to_string()}))
            .collect();
        json!({"$or": children})
    };
    assert!(registry.compile_filter(&clauses(20)).is_ok());
    assert_eq!(
        registry.compile_filter(&clauses(21)).unwrap_err().code,
        RegistryCode::InvalidFilter
    );

    assert_eq!(
        registry
            .compile_filter(&json!({"$where": "1"}))
            .unwrap_err()
            .code,
        RegistryCode::InvalidFilter
    );

    // Filters built in code go through the same limits.
    let mut deep = Filter::eq("zone", "1");
    for _ in 0..6 {
        deep = Filter::not(deep);
    }
    let err = registry
        .enumerate(EnumerateRequest::new(Some(deep.clone())))
        .await
        .unwrap_err();
    assert_eq!(err.code, RegistryCode::InvalidFilter);
    let err = registry
        .multicast(MulticastRequest::new(Some(deep), b"x".to_vec()))
        .await
        .unwrap_err();
    assert_eq!(err.code, RegistryCode::InvalidFilter);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn native_and_engine_side_evaluation_agree(
        dataset in arb_dataset(12),
        filter in arb_filter(),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        for binding in store_bindings() {
            let evaluations = runtime
                .block_on(evaluate_everywhere(&binding, &dataset, Some(&filter)))
                .unwrap();
            prop_assert!(
                evaluations.agree(),
                "{:?} disagrees on {}: {:?}",
                binding,
                filter,
                evaluations
            );
        }
    }
}
