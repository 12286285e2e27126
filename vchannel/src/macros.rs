/// Implements [`VirtualChannel`](crate::VirtualChannel) for a type by deferring to its inherent
/// methods of the same names.
macro_rules! impl_virtual_channel {
    ($ident:ident) => {
        #[deny(unconditional_recursion)] // method calls must defer to inherent methods
        impl crate::VirtualChannel for $ident {
            fn get(
                &self,
                queue: &str,
            ) -> impl std::future::Future<Output = crate::Result<Option<crate::Delivery>>> + Send
            {
                $ident::get(self, queue)
            }

            fn put(
                &self,
                queue: &str,
                envelope: &crate::Envelope,
            ) -> impl std::future::Future<Output = crate::Result<()>> + Send {
                $ident::put(self, queue, envelope)
            }

            fn size(
                &self,
                queue: &str,
            ) -> impl std::future::Future<Output = crate::Result<usize>> + Send {
                $ident::size(self, queue)
            }

            fn purge(
                &self,
                queue: &str,
            ) -> impl std::future::Future<Output = crate::Result<usize>> + Send {
                $ident::purge(self, queue)
            }

            fn close(&mut self) -> crate::Result<()> {
                $ident::close(self)
            }
        }
    };
}
