use crate::error::Result;

/// A plugin registers additional task handlers and (externally) HTTP routes
/// at startup. The application accepts a list of plugins; each is
/// applied once, in order, and a failure aborts startup.
///
/// Generic over the builder type so this crate doesn't need to depend on
/// `anvil-runtime::app::AnvilBuilder`, the concrete type plugins are applied
/// to.
pub trait Plugin<B>: Send + Sync {
    fn plug_to(&self, app: &mut B) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBuilder {
        registered: Vec<&'static str>,
    }

    struct RegisterName(&'static str);

    impl Plugin<FakeBuilder> for RegisterName {
        fn plug_to(&self, app: &mut FakeBuilder) -> Result<()> {
            app.registered.push(self.0);
            Ok(())
        }
    }

    #[test]
    fn plugins_apply_in_order() {
        let mut builder = FakeBuilder {
            registered: Vec::new(),
        };
        let plugins: Vec<Box<dyn Plugin<FakeBuilder>>> =
            vec![Box::new(RegisterName("a")), Box::new(RegisterName("b"))];

        for plugin in &plugins {
            plugin.plug_to(&mut builder).unwrap();
        }

        assert_eq!(builder.registered, vec!["a", "b"]);
    }
}
