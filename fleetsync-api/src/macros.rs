//! Router boilerplate.

/// Derive `axum::extract::FromRef<AppState>` for one or more state fields,
/// so handlers can take `State<Arc<Coordinator>>` instead of the whole
/// `AppState`.
///
/// ```ignore
/// impl_from_ref! {
///     Arc<Coordinator> => coordinator,
///     Arc<ApiConfig> => api_config,
/// }
/// ```
#[macro_export]
macro_rules! impl_from_ref {
    ($($type:ty => $field:ident),+ $(,)?) => {
        $(
            impl axum::extract::FromRef<$crate::state::AppState> for $type {
                fn from_ref(app: &$crate::state::AppState) -> Self {
                    app.$field.clone()
                }
            }
        )+
    };
}
