use kube::CustomResourceExt;
use release_operator::crd::{AppInstall, Release, ReleaseCycle};

fn main() -> Result<(), serde_yaml::Error> {
    for crd in [Release::crd(), ReleaseCycle::crd(), AppInstall::crd()] {
        println!("---");
        print!("{}", serde_yaml::to_string(&crd)?);
    }
    Ok(())
}
