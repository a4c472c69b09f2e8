use kube::CustomResourceExt;
use store_operator::crd::Store;

fn main() {
    print!("{}", serde_yaml::to_string(&Store::crd()).unwrap());
}
