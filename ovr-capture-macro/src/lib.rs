use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, LitStr};
use ovr_capture_core::string_hash32;

/// Creates an `ovr_capture::Label` with its ID hashed at compile time. Usable in statics.
/// # Example
/// ```rust
/// use ovr_capture::Label;
///
/// static PHYSICS: Label = ovr_capture_macro::label!("Physics");
/// assert_eq!(PHYSICS.id(), Label::new("Physics").id());
/// ```
#[proc_macro]
pub fn label(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as LitStr);
    let s = input.value();
    let hash = string_hash32(&s);

    let expanded = quote! {
        ovr_capture::Label::from_static(#hash, #s)
    };

    TokenStream::from(expanded)
}

/// Enters a CPU zone on the global capture context and returns the guard that leaves it.
///
/// The label lives in a hidden static, so it is hashed once and registered once.
/// # Example
/// ```rust
/// fn update() {
///     let _zone = ovr_capture_macro::cpu_zone!("Update");
///     // work
/// }
/// update();
/// ```
#[proc_macro]
pub fn cpu_zone(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as LitStr);
    let s = input.value();
    let hash = string_hash32(&s);

    let expanded = quote! {
        {
            static __OVR_CAPTURE_LABEL: ovr_capture::Label = ovr_capture::Label::from_static(#hash, #s);
            ovr_capture::cpu_zone(&__OVR_CAPTURE_LABEL)
        }
    };

    TokenStream::from(expanded)
}
