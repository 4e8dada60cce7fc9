/// Skip a test if the `git` binary is not installed.
#[macro_export]
macro_rules! skip_without_git {
    () => {
        if !lockbox::core::backend::GitRepo::is_available() {
            eprintln!("SKIPPED: git not installed");
            return;
        }
    };
}
