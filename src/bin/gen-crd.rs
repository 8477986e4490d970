use kube::CustomResourceExt;
use rollouts_controller::crd::experiment::Experiment;
use rollouts_controller::crd::rollout::Rollout;
use serde_json::Value;

fn main() -> anyhow::Result<()> {
    // Use: cargo run --bin gen-crd | python3 -c "import sys,json,yaml; print(yaml.dump_all(json.load(sys.stdin), default_flow_style=False))"
    // to convert to YAML
    let crds: Vec<Value> = vec![
        serde_json::to_value(Rollout::crd())?,
        serde_json::to_value(Experiment::crd())?,
    ];

    println!("{}", serde_json::to_string_pretty(&crds)?);
    Ok(())
}
