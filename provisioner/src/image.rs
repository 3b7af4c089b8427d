//! Image naming
//!
//! Release images are named `[registry/]namespace/app-<app>:v<N>`, where `N`
//! is one more than the number of successful deploys of the app. Platform
//! images are named `[registry/]namespace/<platform>`.

use crate::models::App;
use crate::settings::DockerSettings;

const PLATFORM_REBUILD_INTERVAL: u64 = 10;

fn prefixed(settings: &DockerSettings, name: &str) -> String {
    match settings.registry() {
        Some(registry) => format!(
            "{}/{}/{}",
            registry.trim_end_matches('/'),
            settings.repository_namespace,
            name
        ),
        None => format!("{}/{}", settings.repository_namespace, name),
    }
}

/// Repository of an app's release images, without tag
pub fn app_repository(settings: &DockerSettings, app_name: &str) -> String {
    prefixed(settings, &format!("app-{}", app_name))
}

/// Base image of a platform
pub fn platform_image_name(settings: &DockerSettings, platform: &str) -> String {
    prefixed(settings, platform)
}

/// Release image produced by the given deploy
pub fn release_image_name(settings: &DockerSettings, app_name: &str, version: u64) -> String {
    format!("{}:v{}", app_repository(settings, app_name), version)
}

/// Image the next deploy of an app commits to
pub fn next_release_image_name(settings: &DockerSettings, app_name: &str, deploys: u64) -> String {
    release_image_name(settings, app_name, deploys + 1)
}

/// Most recent committed image of an app
///
/// Apps never deployed through a counted deploy fall back to the untagged
/// repository.
pub fn current_image_name(settings: &DockerSettings, app_name: &str, deploys: u64) -> String {
    if deploys == 0 {
        app_repository(settings, app_name)
    } else {
        release_image_name(settings, app_name, deploys)
    }
}

/// Every tenth deploy starts over from the platform image
fn rebuild_from_platform(deploys: u64) -> bool {
    deploys != 0 && deploys % PLATFORM_REBUILD_INTERVAL == 0
}

/// Image a build container starts from
pub fn build_image_name(
    settings: &DockerSettings,
    app: &App,
    has_containers: bool,
    deploys: u64,
) -> String {
    if has_containers && !rebuild_from_platform(deploys) {
        current_image_name(settings, &app.name, deploys)
    } else {
        platform_image_name(settings, &app.platform)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(registry: Option<&str>) -> DockerSettings {
        DockerSettings {
            registry: registry.map(str::to_string),
            repository_namespace: "tsuru".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_next_release_follows_deploy_count() {
        let settings = settings(None);
        assert_eq!(next_release_image_name(&settings, "myapp", 0), "tsuru/app-myapp:v1");
        assert_eq!(next_release_image_name(&settings, "myapp", 4), "tsuru/app-myapp:v5");
        assert_eq!(
            next_release_image_name(&settings, "myapp", 4),
            next_release_image_name(&settings, "myapp", 4)
        );
    }

    #[test]
    fn test_build_image_without_containers() {
        let app = App::new("myapp", "python");
        assert_eq!(build_image_name(&settings(None), &app, false, 3), "tsuru/python");
    }

    #[test]
    fn test_build_image_with_containers() {
        let app = App::new("myapp", "python");
        assert_eq!(build_image_name(&settings(None), &app, true, 0), "tsuru/app-myapp");
        assert_eq!(build_image_name(&settings(None), &app, true, 2), "tsuru/app-myapp:v2");
    }

    #[test]
    fn test_build_image_every_tenth_deploy() {
        let app = App::new("myapp", "python");
        assert_eq!(build_image_name(&settings(None), &app, true, 20), "tsuru/python");
        assert_eq!(build_image_name(&settings(None), &app, true, 10), "tsuru/python");
        assert_eq!(build_image_name(&settings(None), &app, true, 11), "tsuru/app-myapp:v11");
    }

    #[test]
    fn test_registry_prefix() {
        let app = App::new("myapp", "python");
        let settings = settings(Some("localhost:3030"));
        assert_eq!(
            build_image_name(&settings, &app, false, 0),
            "localhost:3030/tsuru/python"
        );
        assert_eq!(
            next_release_image_name(&settings, "myapp", 0),
            "localhost:3030/tsuru/app-myapp:v1"
        );
    }

    #[test]
    fn test_empty_registry_is_ignored() {
        let settings = settings(Some(""));
        assert_eq!(platform_image_name(&settings, "ruby"), "tsuru/ruby");
    }
}
