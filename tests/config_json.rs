#![cfg(feature = "serde")]

use petalflow::{Error, Loss, Optimizer, TrainConfig};

#[test]
fn parses_a_full_config() {
    let cfg = TrainConfig::from_json_str(
        r#"{
            "loss": "CategoricalCrossEntropy",
            "optimizer": { "Adam": { "beta1": 0.89, "beta2": 0.99 } },
            "lr": 0.01,
            "batch_size": 40,
            "epochs": 10
        }"#,
    )
    .unwrap();
    assert_eq!(cfg.loss, Loss::CategoricalCrossEntropy);
    assert_eq!(
        cfg.optimizer,
        Optimizer::Adam {
            beta1: 0.89,
            beta2: 0.99
        }
    );
    assert_eq!(cfg.batch_size, 40);
    assert_eq!(cfg.epochs, 10);
}

#[test]
fn round_trips_through_a_file() {
    let cfg = TrainConfig {
        optimizer: Optimizer::RmsProp { beta: 0.8 },
        ..TrainConfig::default()
    };
    let path = std::env::temp_dir().join(format!("petalflow-config-{}.json", std::process::id()));
    std::fs::write(&path, cfg.to_json_string().unwrap()).unwrap();
    let loaded = TrainConfig::load_json(&path);
    let _ = std::fs::remove_file(&path);
    assert_eq!(loaded.unwrap(), cfg);
}

#[test]
fn rejects_invalid_configs() {
    let bad_beta = TrainConfig::from_json_str(
        r#"{ "loss": "Mse", "optimizer": { "Sgd": { "momentum": 1.5 } },
             "lr": 0.1, "batch_size": 1, "epochs": 1 }"#,
    );
    assert!(matches!(bad_beta, Err(Error::InvalidConfig(_))));

    let unknown_loss = TrainConfig::from_json_str(
        r#"{ "loss": "Hinge", "optimizer": "AdaGrad", "lr": 0.1, "batch_size": 1, "epochs": 1 }"#,
    );
    assert!(matches!(unknown_loss, Err(Error::InvalidConfig(_))));

    let missing = TrainConfig::load_json("/nonexistent/petalflow.json");
    assert!(matches!(missing, Err(Error::InvalidConfig(_))));
}
