//! Helper macros for agent crates.

#[macro_export]
/// Shortcut for aborting a joinhandle and then awaiting and discarding its
/// result
macro_rules! cancel_task {
    ($task:ident) => {
        #[allow(unused_must_use)]
        {
            let t = $task.into_inner();
            t.abort();
            t.await;
        }
    };
}

use serde::Deserialize;

use crate::settings::Settings;

/// Export this so they don't need to import paste.
#[doc(hidden)]
pub use paste;

#[macro_export]
/// Declare a new settings block
///
/// This macro declares a settings struct for an agent. The new settings
/// block contains a [`crate::settings::Settings`] (flattened) and any other
/// specified attributes.
///
/// Please note that numeric fields should be declared as
/// [`crate::settings::StrOrInt`] (booleans as
/// [`crate::settings::StrOrBool`]) so they can be supplied through env vars
/// and flags, and parsed in the agent's `from_settings`.
///
/// ### Usage
///
/// ```ignore
/// decl_settings!(Collector {
///    poll_interval: Option<StrOrInt>,
///    report_interval: Option<StrOrInt>,
/// });
/// ```
macro_rules! decl_settings {
    (
        $name:ident {
            $($(#[$tags:meta])* $prop:ident: $type:ty,)*
        }
    ) => {
        collector_base::macros::paste::paste! {
            #[derive(Debug, serde::Deserialize)]
            #[serde(rename_all = "camelCase")]
            #[doc = "Settings for `" $name "`"]
            pub struct [<$name Settings>] {
                #[serde(flatten)]
                pub(crate) base: collector_base::settings::Settings,
                $(
                    $(#[$tags])*
                    pub(crate) $prop: $type,
                )*
            }

            impl std::ops::Deref for [<$name Settings>] {
                type Target = collector_base::settings::Settings;

                fn deref(&self) -> &Self::Target {
                    &self.base
                }
            }

            impl AsRef<collector_base::settings::Settings> for [<$name Settings>] {
                fn as_ref(&self) -> &collector_base::settings::Settings {
                    &self.base
                }
            }

            impl collector_base::NewFromSettings for [<$name Settings>] {
                type Error = eyre::Report;

                /// See `load_settings_object` for how the sources are layered.
                fn new() -> Result<Self, Self::Error> {
                    collector_base::macros::_new_settings(stringify!($name))
                }
            }
        }
    }
}

/// Static logic called by the decl_settings! macro. Do not call directly!
#[doc(hidden)]
pub fn _new_settings<'de, T>(name: &str) -> eyre::Result<T>
where
    T: Deserialize<'de> + AsRef<Settings>,
{
    use crate::settings::loader::load_settings_object;

    load_settings_object::<T>(&name.to_lowercase())
}
