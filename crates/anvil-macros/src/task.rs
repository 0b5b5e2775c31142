use darling::ast::NestedMeta;
use darling::FromMeta;
use proc_macro::TokenStream;
use quote::{format_ident, quote};
use syn::{parse_macro_input, ItemFn};

/// Nested `retry(interval = "...", max_attempts = ...)` argument.
#[derive(Debug, FromMeta)]
struct RetryArgs {
    interval: String,
    max_attempts: i64,
}

/// Arguments recognized on `#[task(...)]` itself: `name`, `timeout`,
/// `delay`, `cron`, and `retry`. No priority/worker-capability/idempotency
/// -key — those have no counterpart in the task-definition surface this
/// generates.
#[derive(Debug, Default, FromMeta)]
struct TaskAttrs {
    #[darling(default)]
    name: Option<String>,
    #[darling(default)]
    timeout: Option<String>,
    #[darling(default)]
    delay: Option<String>,
    #[darling(default)]
    cron: Option<String>,
    #[darling(default)]
    retry: Option<RetryArgs>,
}

impl TaskAttrs {
    fn retry_interval(&self) -> Option<&str> {
        self.retry.as_ref().map(|r| r.interval.as_str())
    }

    fn retry_max_attempts(&self) -> Option<i64> {
        self.retry.as_ref().map(|r| r.max_attempts)
    }
}

/// Parses the macro's own argument list — `#[task(timeout = "30s", retry(...))]`
/// — rather than the annotated function's attributes, which carry no
/// task configuration.
fn parse_task_attrs(attr: proc_macro2::TokenStream) -> Result<TaskAttrs, TokenStream> {
    let nested = NestedMeta::parse_meta_list(attr)
        .map_err(|e| TokenStream::from(darling::Error::from(e).write_errors()))?;
    TaskAttrs::from_list(&nested).map_err(|e| TokenStream::from(e.write_errors()))
}

fn parse_duration(s: &str) -> proc_macro2::TokenStream {
    let s = s.trim();
    if let Some(n) = s.strip_suffix("ms") {
        let n: u64 = n.parse().unwrap_or(1000);
        quote! { std::time::Duration::from_millis(#n) }
    } else if let Some(n) = s.strip_suffix('h') {
        let n: u64 = n.parse().unwrap_or(1);
        quote! { std::time::Duration::from_secs(#n * 3600) }
    } else if let Some(n) = s.strip_suffix('m') {
        let n: u64 = n.parse().unwrap_or(5);
        quote! { std::time::Duration::from_secs(#n * 60) }
    } else if let Some(n) = s.strip_suffix('s') {
        let n: u64 = n.parse().unwrap_or(30);
        quote! { std::time::Duration::from_secs(#n) }
    } else {
        let n: u64 = s.parse().unwrap_or(30);
        quote! { std::time::Duration::from_secs(#n) }
    }
}

/// Turns an `async fn(ctx, args) -> Result<()>` into a marker type
/// implementing `anvil_core::task::TaskDef`, plus `Run<Name>`/
/// `Run<Name>WithTx` inherent functions that enqueue it. Grounded on
/// `forge_macros::job::job_impl`'s struct-per-function, attrs-to-`JobInfo`
/// expansion shape.
pub fn task_impl(attr: TokenStream, item: TokenStream) -> TokenStream {
    let input = parse_macro_input!(item as ItemFn);
    let attrs = match parse_task_attrs(attr.into()) {
        Ok(attrs) => attrs,
        Err(err_tokens) => return err_tokens,
    };

    let fn_name = &input.sig.ident;
    let task_name = attrs.name.unwrap_or_else(|| fn_name.to_string());
    let struct_name = format_ident!("{}Task", to_pascal_case(&fn_name.to_string()));
    let run_fn = format_ident!("run_{}", fn_name);
    let run_fn_with_tx = format_ident!("run_{}_with_tx", fn_name);

    let vis = &input.vis;
    let block = &input.block;

    let mut args_type = quote! { () };
    let mut args_ident = format_ident!("_args");

    for input_arg in input.sig.inputs.iter().skip(1) {
        if let syn::FnArg::Typed(pat_type) = input_arg {
            if let syn::Pat::Ident(ident) = pat_type.pat.as_ref() {
                args_ident = ident.ident.clone();
            }
            let ty = &pat_type.ty;
            args_type = quote! { #ty };
        }
    }

    let output_type = match &input.sig.output {
        syn::ReturnType::Default => quote! { () },
        syn::ReturnType::Type(_, ty) => {
            if let syn::Type::Path(path) = ty.as_ref() {
                if let Some(segment) = path.path.segments.last() {
                    if segment.ident == "Result" {
                        if let syn::PathArguments::AngleBracketed(args) = &segment.arguments {
                            if let Some(syn::GenericArgument::Type(inner)) = args.args.first() {
                                quote! { #inner }
                            } else {
                                quote! { () }
                            }
                        } else {
                            quote! { () }
                        }
                    } else {
                        quote! { #ty }
                    }
                } else {
                    quote! { #ty }
                }
            } else {
                quote! { #ty }
            }
        }
    };

    let timeout = match &attrs.timeout {
        Some(t) => {
            let d = parse_duration(t);
            quote! { Some(#d) }
        }
        None => quote! { None },
    };

    let cronjob = match &attrs.cron {
        Some(expr) => quote! {
            Some(anvil_core::task::CronAttribute {
                cron_expression: #expr.to_string(),
            })
        },
        None => quote! { None },
    };

    let default_delay = match &attrs.delay {
        Some(d) => {
            let d = parse_duration(d);
            quote! { Some(#d) }
        }
        None => quote! { None },
    };

    let retry_policy = match (attrs.retry_interval(), attrs.retry_max_attempts()) {
        (Some(interval), Some(max)) if max < 0 => {
            let d = parse_duration(interval);
            quote! { Some(anvil_core::task::RetryPolicy::unbounded(#d)) }
        }
        (Some(interval), Some(max)) => {
            let d = parse_duration(interval);
            let max = max as u32;
            quote! { Some(anvil_core::task::RetryPolicy::bounded(#d, #max)) }
        }
        _ => quote! { None },
    };

    // The annotated function may still carry ordinary attributes (`#[doc =
    // "..."]`, `#[allow(...)]`); those pass through to the generated struct
    // unchanged since task configuration now lives entirely in `attr`.
    let other_attrs = &input.attrs;

    let expanded = quote! {
        #(#other_attrs)*
        #vis struct #struct_name;

        impl anvil_core::task::TaskDef for #struct_name {
            type Args = #args_type;
            type Output = #output_type;

            const NAME: &'static str = #task_name;

            fn default_attributes() -> anvil_core::task::TaskAttributes {
                anvil_core::task::TaskAttributes {
                    timeout: #timeout,
                    cronjob: #cronjob,
                    retry_policy: #retry_policy,
                }
            }

            fn default_delay() -> Option<std::time::Duration> {
                #default_delay
            }

            fn execute<'a>(
                ctx: &'a mut anvil_core::task::TaskContext<'_>,
                #args_ident: Self::Args,
            ) -> std::pin::Pin<Box<dyn std::future::Future<Output = anvil_core::error::Result<Self::Output>> + Send + 'a>> {
                Box::pin(async move #block)
            }
        }

        /// `Run<Name>(executor, args, overrides…)`.
        #vis async fn #run_fn<'e, E>(
            executor: E,
            args: <#struct_name as anvil_core::task::TaskDef>::Args,
            overrides: Vec<anvil_core::task::TaskOverride>,
        ) -> anvil_core::error::Result<i64>
        where
            E: sqlx::PgExecutor<'e>,
        {
            anvil_runtime::task::enqueue::<_, #struct_name>(executor, args, overrides).await
        }

        /// `Run<Name>WithTx(tx, args, overrides…)` — identical to
        /// [`#run_fn`], kept as a distinct name because the distilled
        /// interface names both explicitly; the generic executor parameter
        /// already accepts a live transaction.
        #vis async fn #run_fn_with_tx<'e, E>(
            executor: E,
            args: <#struct_name as anvil_core::task::TaskDef>::Args,
            overrides: Vec<anvil_core::task::TaskOverride>,
        ) -> anvil_core::error::Result<i64>
        where
            E: sqlx::PgExecutor<'e>,
        {
            anvil_runtime::task::enqueue::<_, #struct_name>(executor, args, overrides).await
        }
    };

    TokenStream::from(expanded)
}

fn to_pascal_case(s: &str) -> String {
    s.split('_')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                None => String::new(),
                Some(first) => first.to_uppercase().chain(chars).collect(),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pascal_cases_snake_case_function_names() {
        assert_eq!(to_pascal_case("send_welcome_email"), "SendWelcomeEmail");
        assert_eq!(to_pascal_case("prune_keys"), "PruneKeys");
        assert_eq!(to_pascal_case("simple"), "Simple");
    }

    #[test]
    fn parses_second_and_minute_durations() {
        let secs = parse_duration("30s");
        assert!(!secs.is_empty());
        let mins = parse_duration("5m");
        assert!(!mins.is_empty());
    }

    #[test]
    fn parses_a_delay_argument() {
        let attr: proc_macro2::TokenStream = quote::quote! { delay = "10s" };
        let parsed = parse_task_attrs(attr).unwrap();
        assert_eq!(parsed.delay.as_deref(), Some("10s"));
    }

    #[test]
    fn parses_nested_retry_argument() {
        let attr: proc_macro2::TokenStream =
            quote::quote! { timeout = "30s", retry(interval = "30s", max_attempts = 5) };
        let parsed = parse_task_attrs(attr).unwrap();
        assert_eq!(parsed.timeout.as_deref(), Some("30s"));
        assert_eq!(parsed.retry_interval(), Some("30s"));
        assert_eq!(parsed.retry_max_attempts(), Some(5));
    }

    #[test]
    fn unbounded_retry_uses_negative_max_attempts() {
        let attr: proc_macro2::TokenStream =
            quote::quote! { retry(interval = "1m", max_attempts = -1) };
        let parsed = parse_task_attrs(attr).unwrap();
        assert_eq!(parsed.retry_max_attempts(), Some(-1));
    }
}
