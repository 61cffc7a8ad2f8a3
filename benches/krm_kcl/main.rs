use krm_kcl::{
    matcher::{MatchConstraints, ResourceRule},
    reslist,
    resource::Resource,
};

fn main() {
    divan::main();
}

fn resources(n: usize) -> Vec<Resource> {
    (0..n)
        .map(|i| {
            let (api_version, kind) = if i % 2 == 0 {
                ("apps/v1", "Deployment")
            } else {
                ("v1", "Service")
            };
            Resource::try_from(serde_json::json!({
                "apiVersion": api_version,
                "kind": kind,
                "metadata": { "name": format!("res-{i}"), "labels": { "app": "web" } },
                "spec": { "replicas": i },
            }))
            .unwrap()
        })
        .collect()
}

#[divan::bench(args = [10, 100, 1000])]
fn wrap_unwrap(bencher: divan::Bencher, n: usize) {
    let input = resources(n);
    bencher.bench(|| {
        let list = reslist::wrap(input.iter().cloned(), None);
        let stream = vec![serde_json::to_value(&list).unwrap()];
        reslist::unwrap(stream).unwrap()
    });
}

#[divan::bench(args = [10, 100, 1000])]
fn match_services(bencher: divan::Bencher, n: usize) {
    let input = resources(n);
    let constraints = MatchConstraints {
        resource_rules: vec![ResourceRule {
            api_versions: vec!["*".into()],
            kinds: vec!["Service".into()],
        }],
    };
    bencher.bench(|| {
        input
            .iter()
            .filter(|r| constraints.matches(r))
            .count()
    });
}
