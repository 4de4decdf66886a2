use fedledger_core::contract::{FlContract, GET_AGGREGATED_PARAMS, REGISTER_USER, UPLOAD_MODEL_PARAM};
use fedledger_core::ledger::{Ledger, MemoryLedger, SledLedger};
use fedledger_core::{AggregationGuard, ContractError, DynamicParams, ModelParams, QuorumPolicy, Submission, ThresholdTrigger, TriggerOutcome};

const USERS: [&str; 5] = ["u1", "u2", "u3", "u4", "u5"];

fn contract<P: fedledger_core::ParameterTree>(guard: AggregationGuard) -> FlContract<P> {
    FlContract::new(ThresholdTrigger::new(QuorumPolicy::default(), guard))
}

fn register_all<P: fedledger_core::ParameterTree>(ledger: &dyn Ledger, c: &FlContract<P>) {
    for u in USERS { ledger.submit(&|ctx| c.invoke(ctx, REGISTER_USER, &["G", u])).unwrap(); }
}

fn bias_json(v: f64) -> String { format!(r#"{{"conv1.bias":[{v}]}}"#) }

fn aggregate_bias(ledger: &dyn Ledger, c: &FlContract<DynamicParams>, round: &str) -> Result<f64, ContractError> {
    let raw = ledger.evaluate(&|ctx| c.invoke(ctx, GET_AGGREGATED_PARAMS, &["G", round]))?;
    let agg: Submission<serde_json::Value> = serde_json::from_slice(&raw).unwrap();
    assert!(agg.is_aggregate());
    Ok(agg.params["conv1.bias"][0].as_f64().unwrap())
}

#[test]
fn aggregate_appears_exactly_at_quorum() {
    let ledger = MemoryLedger::new();
    let c = contract::<DynamicParams>(AggregationGuard::LastWriterWins);
    register_all(&ledger, &c);

    for (i, u) in USERS.iter().take(4).enumerate() {
        let before = aggregate_bias(&ledger, &c, "0");
        assert!(matches!(before, Err(ref e) if e.is_not_found()), "aggregate present before upload {}", i + 1);
        let params = bias_json((i + 1) as f64);
        ledger.submit(&|ctx| c.invoke(ctx, UPLOAD_MODEL_PARAM, &["G", "0", *u, params.as_str()])).unwrap();
    }
    assert_eq!(aggregate_bias(&ledger, &c, "0").unwrap(), 2.5);
    assert_eq!(ledger.version("G_AGGREPARAM_0"), 1);
    // another round is independent
    assert!(aggregate_bias(&ledger, &c, "1").unwrap_err().is_not_found());
}

#[test]
fn concurrent_uploads_last_writer_wins() {
    let ledger = MemoryLedger::new();
    let c = contract::<DynamicParams>(AggregationGuard::LastWriterWins);
    register_all(&ledger, &c);

    std::thread::scope(|s| {
        for (i, u) in USERS.iter().enumerate() {
            let (ledger, c) = (&ledger, &c);
            s.spawn(move || {
                let params = bias_json((i + 1) as f64);
                ledger.submit(&|ctx| c.invoke(ctx, UPLOAD_MODEL_PARAM, &["G", "0", *u, params.as_str()])).unwrap();
            });
        }
    });

    // the 4th and 5th serialized uploads each rewrite the aggregate; the last one saw everyone
    assert_eq!(ledger.version("G_AGGREPARAM_0"), 2);
    assert_eq!(aggregate_bias(&ledger, &c, "0").unwrap(), 3.0);
}

#[test]
fn concurrent_uploads_write_once() {
    let ledger = MemoryLedger::new();
    let c = contract::<DynamicParams>(AggregationGuard::WriteOnce);
    register_all(&ledger, &c);

    std::thread::scope(|s| {
        for u in USERS {
            let (ledger, c) = (&ledger, &c);
            s.spawn(move || {
                ledger.submit(&|ctx| c.invoke(ctx, UPLOAD_MODEL_PARAM, &["G", "0", u, bias_json(1.0).as_str()])).unwrap();
            });
        }
    });

    assert_eq!(ledger.version("G_AGGREPARAM_0"), 1);
    assert_eq!(aggregate_bias(&ledger, &c, "0").unwrap(), 1.0);
    assert_eq!(ledger.keys_with_prefix("G_PARAM_").len(), 5);
}

#[test]
fn outsider_upload_rejected() {
    let ledger = MemoryLedger::new();
    let c = contract::<DynamicParams>(AggregationGuard::LastWriterWins);
    register_all(&ledger, &c);
    let err = ledger.submit(&|ctx| c.invoke(ctx, UPLOAD_MODEL_PARAM, &["G", "0", "eve", bias_json(9.0).as_str()])).unwrap_err();
    assert!(matches!(err, ContractError::NotRegistered { ref user, .. } if user == "eve"));
    assert!(ledger.get("G_PARAM_eve_0").is_none());
}

fn fixed(bias: f64, fc3_len: usize) -> ModelParams {
    ModelParams {
        conv1_bias: vec![bias],
        fc1_weight: vec![vec![bias, -bias]],
        fc3_bias: vec![bias; fc3_len],
        ..ModelParams::default()
    }
}

#[test]
fn fixed_schema_on_sled() {
    let ledger = SledLedger::temporary().unwrap();
    let c = contract::<ModelParams>(AggregationGuard::LastWriterWins);
    register_all(&ledger, &c);

    let mut outcomes = Vec::new();
    for (i, u) in USERS.iter().take(4).enumerate() {
        let outcome = std::sync::Mutex::new(None);
        let params = fixed((i + 1) as f64, 2);
        ledger.submit(&|ctx| {
            *outcome.lock().unwrap() = Some(c.upload_model_param(ctx, "G", "0", u, &serde_json::to_string(&params).unwrap())?);
            Ok(vec![])
        }).unwrap();
        outcomes.push(outcome.into_inner().unwrap().unwrap());
    }
    assert!(matches!(outcomes[2], TriggerOutcome::Pending { present: 3, quorum: 4 }));
    assert!(matches!(outcomes[3], TriggerOutcome::Aggregated { participants: 4, quorum: 4 }));

    let raw = ledger.evaluate(&|ctx| c.invoke(ctx, GET_AGGREGATED_PARAMS, &["G", "0"])).unwrap();
    let agg: Submission<ModelParams> = serde_json::from_slice(&raw).unwrap();
    assert_eq!(agg.params.conv1_bias, vec![2.5]);
    assert_eq!(agg.params.fc1_weight, vec![vec![2.5, -2.5]]);
}

#[test]
fn fixed_schema_shape_mismatch_skips_aggregate() {
    let ledger = MemoryLedger::new();
    let c = contract::<ModelParams>(AggregationGuard::LastWriterWins);
    register_all(&ledger, &c);

    for (i, u) in USERS.iter().take(4).enumerate() {
        let params = serde_json::to_string(&fixed(1.0, if i == 3 { 3 } else { 2 })).unwrap();
        ledger.submit(&|ctx| c.invoke(ctx, UPLOAD_MODEL_PARAM, &["G", "0", *u, params.as_str()])).unwrap();
    }
    assert!(ledger.get("G_PARAM_u4_0").is_some());
    assert!(ledger.get("G_AGGREPARAM_0").is_none());
}
