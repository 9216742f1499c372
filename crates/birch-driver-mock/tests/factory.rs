//! Building mock instruments from configuration tables.

use birch_core::{Measurement, Movement};
use birch_driver_mock::{build, validate, MockInstrument, MOCK_METER, MOCK_STAGE};

fn table(src: &str) -> toml::Value {
    toml::from_str(src).unwrap()
}

#[tokio::test]
async fn stage_from_config() {
    let config = table(
        r#"
        position_column = "X"
        units = "um"
        initial_position = 4.0
        "#,
    );
    let MockInstrument::Stage(stage) = build(MOCK_STAGE, "piezo_x", config).unwrap() else {
        panic!("expected a stage");
    };

    assert_eq!(stage.name(), "piezo_x");
    assert_eq!(stage.position_column(), "X");
    assert_eq!(stage.position_units(), "um");
    assert_eq!(stage.position().await.unwrap(), 4.0);
}

#[tokio::test]
async fn meter_from_empty_config() {
    let MockInstrument::Meter(meter) = build(MOCK_METER, "dmm", table("")).unwrap() else {
        panic!("expected a meter");
    };

    let data = meter.perform_measurement().await.unwrap();
    assert_eq!(data.columns().len(), 2);
    assert_eq!(data.num_rows(), 1);
}

#[test]
fn unknown_type_rejected() {
    assert!(validate("laser", &table("")).is_err());
    assert!(build("laser", "l1", table("")).is_err());
}

#[test]
fn bad_config_rejected() {
    assert!(validate(MOCK_STAGE, &table("initial_position = \"far\"")).is_err());
    assert!(validate(MOCK_METER, &table("rows = 3")).is_ok());
}
