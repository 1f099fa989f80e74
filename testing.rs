macro_rules! tree_test {
    ($(source: [$($spath:literal => $scontent:expr),* $(,)?])? $(dest: [$($dpath:literal => $dcontent:expr),* $(,)?])?) => {{
        let source = ::tempfile::tempdir().unwrap();
        let dest = ::tempfile::tempdir().unwrap();
        $($({
            let path = source.path().join($spath);
            ::std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            ::std::fs::write(path, $scontent).unwrap();
        })*)?
        $($({
            let path = dest.path().join($dpath);
            ::std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            ::std::fs::write(path, $dcontent).unwrap();
        })*)?
        (source, dest)
    }};
}

pub(crate) use tree_test;
