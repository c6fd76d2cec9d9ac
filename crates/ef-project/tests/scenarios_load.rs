use std::path::Path;

#[test]
fn bundled_scenarios_load_and_validate() {
    let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../scenarios");
    let scenarios = [
        "01_vanderpol_envelope.yaml",
        "02_vanderpol_reference.yaml",
        "03_decay_variable_envelope.json",
        "04_stiff_euler.yaml",
        "05_decay_trapezoidal_envelope.yaml",
    ];

    for name in scenarios {
        let path = root.join(name);
        let scenario =
            ef_project::load(&path).unwrap_or_else(|e| panic!("Failed to load {}: {}", name, e));
        ef_project::validate_scenario(&scenario)
            .unwrap_or_else(|e| panic!("Failed to validate {}: {}", name, e));
    }
}
